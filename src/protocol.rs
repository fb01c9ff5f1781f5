use crate::event::{Event, MergedEvent};
use thiserror::Error;

/// Errors generated at the wire framing boundary.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to encode event frame: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode event frame: {0}")]
    Decode(serde_json::Error),
}

/// Encodes an [`Event`] into its wire frame. The frame is the internally tagged JSON encoding of
/// the envelope: `(type, source_id, payload fields)`, with timestamps as i64 microseconds since
/// the UTC epoch so that round-trips are exact.
pub fn encode_frame(event: &Event) -> Result<Vec<u8>, FrameError> {
    serde_json::to_vec(event).map_err(FrameError::Encode)
}

/// Decodes an [`Event`] wire frame. A malformed frame is a recoverable error: callers drop the
/// frame and continue.
pub fn decode_frame(frame: &[u8]) -> Result<Event, FrameError> {
    serde_json::from_slice(frame).map_err(FrameError::Decode)
}

/// Encodes a [`MergedEvent`] into the result frame delivered to clients.
pub fn encode_merged_frame(merged: &MergedEvent) -> Result<Vec<u8>, FrameError> {
    serde_json::to_vec(merged).map_err(FrameError::Encode)
}

/// Decodes a [`MergedEvent`] result frame.
pub fn decode_merged_frame(frame: &[u8]) -> Result<MergedEvent, FrameError> {
    serde_json::from_slice(frame).map_err(FrameError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        order_source_id, transaction_sim_id, EmptyEvent, OrderEvent, TradeEvent, TransactionEvent,
    };
    use chrono::{TimeZone, Utc};

    fn dt_with_micros() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2008, 1, 7, 14, 30, 0).unwrap() + chrono::Duration::microseconds(123_456)
    }

    #[test]
    fn trade_frame_round_trips_exactly() {
        let input = Event::Trade(TradeEvent {
            source_id: "trades-133".into(),
            sid: 133,
            price: 10.1,
            volume: 100,
            dt: dt_with_micros(),
        });

        let actual = decode_frame(&encode_frame(&input).unwrap()).unwrap();

        assert_eq!(actual, input);
    }

    #[test]
    fn order_frame_round_trips_exactly() {
        let mut order = OrderEvent::new(133, -100, dt_with_micros());
        order.filled = -25;
        let input = Event::Order(order);

        let actual = decode_frame(&encode_frame(&input).unwrap()).unwrap();

        assert_eq!(actual, input);
    }

    #[test]
    fn transaction_frame_round_trips_exactly() {
        let input = Event::Transaction(TransactionEvent {
            source_id: transaction_sim_id(),
            sid: 133,
            amount: 25,
            price: 10.163125,
            commission: 0.75,
            dt: dt_with_micros(),
        });

        let actual = decode_frame(&encode_frame(&input).unwrap()).unwrap();

        assert_eq!(actual, input);
    }

    #[test]
    fn empty_frame_round_trips_exactly() {
        let input = Event::Empty(EmptyEvent::new(order_source_id()));

        let actual = decode_frame(&encode_frame(&input).unwrap()).unwrap();

        assert_eq!(actual, input);
    }

    #[test]
    fn merged_frame_round_trips_exactly() {
        let trade = TradeEvent {
            source_id: "trades-133".into(),
            sid: 133,
            price: 10.1,
            volume: 100,
            dt: dt_with_micros(),
        };
        let input = MergedEvent {
            event: Event::Trade(trade.clone()),
            transaction: Some(TransactionEvent {
                source_id: transaction_sim_id(),
                sid: 133,
                amount: 25,
                price: 10.163125,
                commission: 0.75,
                dt: trade.dt,
            }),
        };

        let actual = decode_merged_frame(&encode_merged_frame(&input).unwrap()).unwrap();

        assert_eq!(actual, input);
    }

    #[test]
    fn malformed_frame_is_a_decode_error() {
        let actual = decode_frame(b"{\"type\":\"Trade\",\"sid\":");

        assert!(matches!(actual, Err(FrameError::Decode(_))));
    }
}

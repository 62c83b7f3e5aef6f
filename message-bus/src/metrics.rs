//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, HistogramVec,
    IntGauge,
};

lazy_static! {
    /// Total messages published
    pub static ref MESSAGE_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_publish_total",
        "Total messages published",
        &["topic", "status"]
    )
    .unwrap();

    /// Message publish duration
    pub static ref MESSAGE_PUBLISH_DURATION: HistogramVec = register_histogram_vec!(
        "message_bus_publish_duration_seconds",
        "Message publish duration in seconds",
        &["topic"]
    )
    .unwrap();

    /// Total messages received
    pub static ref MESSAGE_RECEIVE_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_receive_total",
        "Total messages received",
        &["topic", "status"]
    )
    .unwrap();

    /// Message processing duration
    pub static ref MESSAGE_PROCESS_DURATION: HistogramVec = register_histogram_vec!(
        "message_bus_process_duration_seconds",
        "Message processing duration in seconds",
        &["topic"]
    )
    .unwrap();

    /// Messages routed to the dead-letter queue
    pub static ref MESSAGE_DEAD_LETTER_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_dead_letter_total",
        "Messages routed to the dead-letter queue",
        &["topic", "reason"]
    )
    .unwrap();

    /// Messages held in the broker journal
    pub static ref BUS_JOURNAL_DEPTH: IntGauge = register_int_gauge!(
        "message_bus_journal_depth",
        "Messages held in the in-process broker journal"
    )
    .unwrap();
}

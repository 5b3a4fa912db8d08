//! 访问事件管道：有界分发、访问日志 sink 以及落库的 Stream 消费者

pub mod consumer;
pub mod dispatcher;
pub mod sink;

pub use consumer::{AccessLogConsumer, BatchOutcome, Disposition, ReplayCursor};
pub use dispatcher::{DispatcherOptions, VisitDispatcher};
pub use sink::{
    AccessLogMessage, AccessLogSink, FallbackSink, RedisStreamSink, SinkFactory, StoreSink,
};

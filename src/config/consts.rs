/// Interval between liveness polls of a draining step (milliseconds)
pub const DEFAULT_LIVENESS_POLL_MS: u64 = 100;
/// Budget for a step program to describe itself (seconds)
pub const DEFAULT_DESCRIBE_TIMEOUT_SECS: u64 = 10;
/// Drain budget for built-in publish steps when none is configured (seconds)
pub const DEFAULT_PUBLISH_TIME_OUT: u64 = 60;
/// AMQP port when an endpoint does not name one
pub const DEFAULT_AMQP_PORT: u16 = 5672;
/// AMQPS port when an endpoint does not name one and TLS is on
pub const DEFAULT_AMQPS_PORT: u16 = 5671;
/// Connect attempts per endpoint before the transport gives up
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
/// Delay between connect attempts (milliseconds)
pub const DEFAULT_CONNECT_DELAY_MS: u64 = 1_000;
/// Grace window before a connection is torn down (milliseconds)
pub const DEFAULT_CLOSE_GRACE_MS: u64 = 500;
/// How long to wait for a broker reply during the handshake (milliseconds)
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 10_000;
/// HTTP sink request timeout (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

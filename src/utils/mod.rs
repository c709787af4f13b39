//! The `utils` module provides the error type and logging setup shared across
//! `brokerlink`.

pub mod error;
pub mod logging;

pub use error::{LinkError, Result};

#[cfg(test)]
mod tests {
    use super::{LinkError, logging};

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }

    #[test]
    fn no_valid_broker_lists_topics() {
        let err = LinkError::NoValidBroker {
            topics: vec!["orders".to_string(), "payments".to_string()],
        };
        assert_eq!(err.to_string(), "no valid broker for topics orders,payments");
    }

    #[test]
    fn transient_errors() {
        let dial = LinkError::transport(
            "127.0.0.1:1",
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        );
        assert!(dial.is_transient());
        assert!(
            !LinkError::NoRoute {
                topic: "orders".to_string()
            }
            .is_transient()
        );
    }
}

//! Inter-node messaging.
//!
//! Outbound messages go through [`MessagingDriver`]. Inbound messages are
//! decoded inside the substrate callback, queued, and handled by
//! [`handler::run_dispatcher`] on its own task, since handlers must not call
//! back into the substrate.

pub mod driver;
pub mod handler;

use thiserror::Error;

use crate::substrate::SubstrateError;

pub use driver::MessagingDriver;
pub use handler::{
    install_handlers, run_dispatcher, uninstall_handlers, Dispatcher, InboundMessage,
};

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("failed to encode {name}: {source}")]
    Encode {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to post {name} to {dst}: {source}")]
    Post {
        dst: String,
        name: &'static str,
        #[source]
        source: SubstrateError,
    },

    #[error("failed to spread {name}: {source}")]
    Spread {
        name: &'static str,
        #[source]
        source: SubstrateError,
    },
}

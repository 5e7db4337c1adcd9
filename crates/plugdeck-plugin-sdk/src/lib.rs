pub mod protocol;

pub use protocol::{
    ProtocolError, SubscriptionEmission, SubscriptionKind, SubscriptionRequest,
    SUB_EMISSION_KIND, SUB_REQUEST_KIND,
};

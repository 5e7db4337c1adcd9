use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle};

use plugdeck_plugin_sdk::{
    SubscriptionEmission, SubscriptionKind, SubscriptionRequest, SUB_REQUEST_KIND,
};

/// The channel endpoint a plugin transfers with its connection request. Once
/// handed to the broker it is owned by the broker-side subscription set for
/// its entire lifetime; sends after the remote end is gone simply fail and
/// end the subscription.
pub type EmissionPort = mpsc::UnboundedSender<SubscriptionEmission>;

/// One inbound cross-context connection request: an untrusted payload plus
/// the transferred channel endpoints.
#[derive(Debug)]
pub struct InboundConnect {
    pub payload: Value,
    pub ports: Vec<EmissionPort>,
}

/// The signed-in user as exposed to plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

enum AuthCommand {
    Publish(Option<Principal>),
    Subscribe(mpsc::UnboundedSender<Option<Principal>>),
}

/// Handle the host session layer uses to publish principal changes.
#[derive(Debug, Clone)]
pub struct AuthPublisher {
    commands: mpsc::UnboundedSender<AuthCommand>,
}

impl AuthPublisher {
    pub fn publish(&self, principal: Option<Principal>) {
        let _ = self.commands.send(AuthCommand::Publish(principal));
    }
}

/// Cold, stateful stream of "current principal or none": subscribing
/// delivers the current value immediately, then one update per change, in
/// publish order. A single fan-out task relays every published change to
/// every live subscription, so rapid successive changes are never coalesced.
#[derive(Debug, Clone)]
pub struct AuthSource {
    commands: mpsc::UnboundedSender<AuthCommand>,
}

impl AuthSource {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<Principal>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(AuthCommand::Subscribe(tx));
        rx
    }
}

/// Creates the auth-status collaborator pair: a publisher for the host
/// session layer and the source the broker subscribes against.
pub fn auth_channel(initial: Option<Principal>) -> (AuthPublisher, AuthSource) {
    let (commands, mut inbox) = mpsc::unbounded_channel::<AuthCommand>();
    tokio::spawn(async move {
        let mut current = initial;
        let mut subscribers: Vec<mpsc::UnboundedSender<Option<Principal>>> = Vec::new();
        while let Some(command) = inbox.recv().await {
            match command {
                AuthCommand::Publish(principal) => {
                    current = principal;
                    subscribers.retain(|sub| sub.send(current.clone()).is_ok());
                }
                AuthCommand::Subscribe(sub) => {
                    if sub.send(current.clone()).is_ok() {
                        subscribers.push(sub);
                    }
                }
            }
        }
    });
    (
        AuthPublisher {
            commands: commands.clone(),
        },
        AuthSource { commands },
    )
}

/// Host data sources plugins may subscribe to.
#[derive(Debug, Clone)]
pub struct HostSources {
    pub auth: AuthSource,
}

/// Answers inbound plugin-to-host connection requests and maintains live
/// one-way subscriptions over the transferred channel endpoint.
///
/// Installed exactly once for the lifetime of the application. Requesters
/// are served concurrently and independently; no state couples one
/// requester's subscriptions to another's.
pub struct MessageBroker {
    transport: mpsc::UnboundedSender<InboundConnect>,
    _task: JoinHandle<()>,
}

impl MessageBroker {
    pub fn spawn(sources: HostSources) -> Self {
        let (transport, mut inbound) = mpsc::unbounded_channel::<InboundConnect>();
        let task = tokio::spawn(async move {
            while let Some(connect) = inbound.recv().await {
                handle_connect(connect, &sources);
            }
        });
        Self {
            transport,
            _task: task,
        }
    }

    /// Sender handed to the embedding layer that receives cross-context
    /// messages from plugin code.
    pub fn transport(&self) -> mpsc::UnboundedSender<InboundConnect> {
        self.transport.clone()
    }
}

fn handle_connect(connect: InboundConnect, sources: &HostSources) {
    let Some((request, port)) = validate(connect) else {
        // Never acknowledge malformed input: the sender is not verified at
        // this layer and structured errors would leak to arbitrary contexts.
        metrics::counter!("plugdeck_broker_requests_total", "outcome" => "rejected").increment(1);
        tracing::debug!("malformed subscription request dropped");
        return;
    };
    metrics::counter!("plugdeck_broker_requests_total", "outcome" => "accepted").increment(1);
    for kind in &request.subscription_kinds {
        match kind.parse::<SubscriptionKind>() {
            Ok(SubscriptionKind::AuthStatus) => {
                subscribe_auth(&sources.auth, port.clone());
            }
            Err(err) => {
                // A version-mismatched plugin, most likely. Sibling kinds in
                // the same request keep working.
                tracing::error!(error = %err, "subscription attempt rejected");
                metrics::counter!("plugdeck_broker_subscriptions_total", "outcome" => "unknown")
                    .increment(1);
            }
        }
    }
}

/// A request is served only if the payload parses as a subscription request
/// carrying the right marker, at least one kind, and exactly one endpoint.
fn validate(connect: InboundConnect) -> Option<(SubscriptionRequest, EmissionPort)> {
    if connect.ports.len() != 1 {
        return None;
    }
    let request: SubscriptionRequest = serde_json::from_value(connect.payload).ok()?;
    if request.kind != SUB_REQUEST_KIND || request.subscription_kinds.is_empty() {
        return None;
    }
    let port = connect.ports.into_iter().next()?;
    Some((request, port))
}

fn subscribe_auth(source: &AuthSource, port: EmissionPort) {
    let mut updates = source.subscribe();
    tokio::spawn(async move {
        while let Some(principal) = updates.recv().await {
            let data = principal
                .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            let emission = SubscriptionEmission::new(SubscriptionKind::AuthStatus, data);
            if port.send(emission).is_err() {
                // Remote end is gone; the subscription dies silently.
                return;
            }
        }
    });
}

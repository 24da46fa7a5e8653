use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::error::{ResearchError, Result};

// ============================================================================
// CANCELLATION TOKEN
// ============================================================================

pub use tokio_util::sync::CancellationToken;

/// Turns a cancelled token into the error the stream reports.
pub trait CancellationCheck {
    fn check(&self) -> Result<()>;
}

impl CancellationCheck for CancellationToken {
    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ResearchError::cancelled("Operation cancelled"))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// SESSION REGISTRY
// ============================================================================

/// Ticket for one registered session.
#[derive(Clone, Debug)]
pub struct SessionTicket {
    pub context: String,
    pub session_id: u64,
    pub token: CancellationToken,
}

/// Keeps at most one live stream per UI context: registering a new session
/// cancels whichever session held the context before it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Arc<RwLock<HashMap<String, (u64, CancellationToken)>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, context: &str) -> SessionTicket {
        let session_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let mut active = self.active.write().await;
        if let Some((previous, previous_token)) =
            active.insert(context.to_string(), (session_id, token.clone()))
        {
            log::info!(
                "cancelling session {} for context '{}' in favour of session {}",
                previous,
                context,
                session_id
            );
            previous_token.cancel();
        }

        SessionTicket {
            context: context.to_string(),
            session_id,
            token,
        }
    }

    pub async fn cancel(&self, context: &str) -> bool {
        let active = self.active.read().await;
        if let Some((_, token)) = active.get(context) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Removes the ticket unless a newer session already took its context.
    pub async fn unregister(&self, ticket: &SessionTicket) {
        let mut active = self.active.write().await;
        if active
            .get(&ticket.context)
            .is_some_and(|(id, _)| *id == ticket.session_id)
        {
            active.remove(&ticket.context);
        }
    }

    pub async fn is_active(&self, context: &str) -> bool {
        self.active.read().await.contains_key(context)
    }
}

// ============================================================================
// TESTS
// ============================================================================

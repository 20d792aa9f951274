/**
 * Outbound Notifications
 * The core only needs "send a message containing a code to an address";
 * delivery is a pluggable capability. The default implementation writes
 * the message to the log, which is what dev and test environments want.
 */
use std::sync::{Arc, OnceLock};

pub const CONFIRMATION_SUBJECT: &str = "Confirmation code";

/// Delivery capability. Implementations must not block the caller for long;
/// dispatch happens on a spawned task either way.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Stub delivery: logs the message instead of sending it.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), String> {
        tracing::info!(to = %to, subject = %subject, "email dispatched (log stub)");
        Ok(())
    }
}

static MAILER: OnceLock<Arc<dyn Mailer>> = OnceLock::new();

/// Install a delivery implementation. First call wins; later calls are
/// ignored, matching the pool-initialization contract in `db`.
pub fn set_mailer(mailer: Arc<dyn Mailer>) {
    let _ = MAILER.set(mailer);
}

fn mailer() -> Arc<dyn Mailer> {
    MAILER.get_or_init(|| Arc::new(LogMailer)).clone()
}

/// Dispatch a confirmation code, fire-and-forget. A delivery failure is
/// logged and never propagated: the registration it belongs to has already
/// been persisted and must stand.
pub fn send_confirmation_code(email: &str, code: &str) {
    let to = email.to_string();
    let body = format!("Your confirmation code is {}.", code);
    let mailer = mailer();
    tokio::spawn(async move {
        if let Err(e) = mailer.send(&to, CONFIRMATION_SUBJECT, &body) {
            tracing::warn!("failed to deliver confirmation email to {}: {}", to, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMailer {
        sent: Arc<AtomicUsize>,
    }

    impl Mailer for CountingMailer {
        fn send(&self, _to: &str, _subject: &str, body: &str) -> Result<(), String> {
            assert!(body.contains("confirmation code"));
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // Single test touching the global mailer: the slot can only be set once
    // per process.
    #[tokio::test]
    async fn test_dispatch_reaches_installed_mailer() {
        let sent = Arc::new(AtomicUsize::new(0));
        set_mailer(Arc::new(CountingMailer { sent: sent.clone() }));

        send_confirmation_code("bob@x.com", "1234-1234-1234-1234-1234");
        send_confirmation_code("bob@x.com", "1234-1234-1234-1234-1234");

        // let the spawned dispatch tasks run
        for _ in 0..10 {
            if sent.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }
}

use std::collections::HashMap;

use ntt_types::MediumHash;
use tokio_postgres::Client;

use crate::error::DiagnosticsError;
use crate::event::{Action, DiagnosticEvent};

/// Diagnostic events queued during a batch, owned by the worker loop and
/// flushed only after the batch's DB transaction has committed — never
/// from inside it (spec §4.2's critical discipline: writing here while the
/// claim transaction is still open would hold its row locks open longer
/// than necessary and invite another worker to steal half-processed rows).
pub type PendingDiagnostics = Vec<DiagnosticEvent>;

/// Appends queued diagnostic events to `medium.problems.diagnostic_events`
/// in one transaction per call, one row-level update per distinct medium
/// touched (spec §4.2's deferred-recording discipline).
pub async fn flush_problems(client: &mut Client, events: &[DiagnosticEvent]) -> Result<(), DiagnosticsError> {
    if events.is_empty() {
        return Ok(());
    }

    let mut by_medium: HashMap<MediumHash, Vec<&DiagnosticEvent>> = HashMap::new();
    for event in events {
        by_medium.entry(event.inode.medium_hash).or_default().push(event);
    }

    let tx = client.transaction().await?;
    for (medium_hash, medium_events) in by_medium {
        let payload = serde_json::to_value(
            medium_events
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "device": e.inode.device,
                        "inode_number": e.inode.inode_number,
                        "error_type": e.error_type.as_db_str(),
                        "checks": e.checks,
                        "action": match e.action {
                            Action::DiagnosticSkip => "diagnostic_skip",
                            Action::Continuing => "continuing",
                        },
                        "retry_count": e.retry_count,
                    })
                })
                .collect::<Vec<_>>(),
        )?;

        tx.execute(
            "UPDATE medium SET problems = jsonb_set( \
                 coalesce(problems, '{}'::jsonb), \
                 '{diagnostic_events}', \
                 coalesce(problems -> 'diagnostic_events', '[]'::jsonb) || $2::jsonb, \
                 true) \
             WHERE medium_hash = $1",
            &[&medium_hash.to_string(), &payload],
        )
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::force_skip_event;
    use ntt_types::InodeKey;

    #[test]
    fn groups_events_by_medium_before_building_update_statements() {
        let m1: MediumHash = "11".repeat(16).parse().unwrap();
        let m2: MediumHash = "22".repeat(16).parse().unwrap();
        let events = vec![
            force_skip_event(InodeKey { medium_hash: m1, device: 1, inode_number: 1 }, 50),
            force_skip_event(InodeKey { medium_hash: m2, device: 1, inode_number: 2 }, 50),
            force_skip_event(InodeKey { medium_hash: m1, device: 1, inode_number: 3 }, 50),
        ];
        let mut by_medium: HashMap<MediumHash, Vec<&DiagnosticEvent>> = HashMap::new();
        for e in &events {
            by_medium.entry(e.inode.medium_hash).or_default().push(e);
        }
        assert_eq!(by_medium.len(), 2);
        assert_eq!(by_medium[&m1].len(), 2);
        assert_eq!(by_medium[&m2].len(), 1);
    }
}

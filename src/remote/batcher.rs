// 📦 Statement batching under the endpoint's per-call ceilings
//
// Groups are kept whole: a contact's statements always land in the same
// call, in order. Groups are packed greedily in the order given.

use super::statement::Statement;
use super::transport::CallLimits;
use crate::error::{Error, Result};

pub struct StatementBatcher {
    limits: CallLimits,
}

impl StatementBatcher {
    pub fn new(limits: CallLimits) -> Self {
        StatementBatcher { limits }
    }

    pub fn limits(&self) -> CallLimits {
        self.limits
    }

    /// Pack statement groups into calls
    pub fn pack(&self, groups: Vec<Vec<Statement>>) -> Result<Vec<Vec<Statement>>> {
        let mut calls = Vec::new();
        let mut current: Vec<Statement> = Vec::new();
        // "[" + "]"
        let mut current_bytes = 2;

        for group in groups {
            if group.is_empty() {
                continue;
            }

            // +1 per statement for the separating comma
            let group_bytes: usize = group.iter().map(|s| s.approx_size() + 1).sum();

            if group.len() > self.limits.max_statements || group_bytes + 2 > self.limits.max_payload_bytes {
                return Err(Error::PayloadTooLarge(format!(
                    "statement group of {} statements / {} bytes cannot fit in one call",
                    group.len(),
                    group_bytes
                )));
            }

            let overflow = current.len() + group.len() > self.limits.max_statements
                || current_bytes + group_bytes > self.limits.max_payload_bytes;

            if overflow && !current.is_empty() {
                calls.push(std::mem::take(&mut current));
                current_bytes = 2;
            }

            current_bytes += group_bytes;
            current.extend(group);
        }

        if !current.is_empty() {
            calls.push(current);
        }

        Ok(calls)
    }
}

/// Bounded slices of an ID list for `IN (...)` clauses
pub fn id_chunks(ids: &[String], size: usize) -> std::slice::Chunks<'_, String> {
    ids.chunks(size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(n: usize) -> Vec<Statement> {
        (0..n).map(|i| Statement::new("SELECT ?").bind(i as i64)).collect()
    }

    #[test]
    fn test_groups_stay_whole() {
        let batcher = StatementBatcher::new(CallLimits {
            max_statements: 5,
            ..Default::default()
        });

        let calls = batcher.pack(vec![group(3), group(3), group(2)]).unwrap();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 3);
        assert_eq!(calls[1].len(), 5);
    }

    #[test]
    fn test_every_call_respects_limits() {
        let limits = CallLimits {
            max_statements: 7,
            max_payload_bytes: 400,
            id_batch_size: 100,
        };
        let batcher = StatementBatcher::new(limits);
        let groups: Vec<Vec<Statement>> = (1..=20).map(|n| group(n % 4 + 1)).collect();
        let total: usize = groups.iter().map(|g| g.len()).sum();

        let calls = batcher.pack(groups).unwrap();

        assert_eq!(calls.iter().map(|c| c.len()).sum::<usize>(), total);
        for call in &calls {
            assert!(limits.check(call).is_ok());
        }
    }

    #[test]
    fn test_oversized_group_is_rejected() {
        let batcher = StatementBatcher::new(CallLimits {
            max_statements: 2,
            ..Default::default()
        });
        assert!(matches!(batcher.pack(vec![group(3)]), Err(Error::PayloadTooLarge(_))));
    }

    #[test]
    fn test_id_chunks() {
        let ids: Vec<String> = (0..250).map(|i| format!("id{}", i)).collect();
        let sizes: Vec<usize> = id_chunks(&ids, 100).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(id_chunks(&ids, 0).count(), 250);
    }
}

//! Dispatch of compaction attempts to named services.
//!
//! Resolution is a pure function of the table's dispatch options, the
//! compaction kind, and the request hints; it is re-evaluated on every
//! attempt so configuration changes take effect immediately.

use std::collections::BTreeMap;

use crate::{
    config::DISPATCH_SERVICE_KEY,
    error::DispatchError,
    request::{CompactionKind, ExecutionHints, COMPACTION_TYPE_HINT},
};

/// Resolve the service handling a (table, kind, hints) combination.
///
/// Order: a recognized `compaction_type` alias override for user requests,
/// then the per-kind service, then the table default. No service is ever
/// assumed silently.
pub(crate) fn resolve(
    table: &str,
    options: &BTreeMap<String, String>,
    kind: CompactionKind,
    hints: &ExecutionHints,
) -> Result<String, DispatchError> {
    if kind == CompactionKind::User {
        if let Some(alias) = hints.get(COMPACTION_TYPE_HINT) {
            let key = format!("{DISPATCH_SERVICE_KEY}.user.{alias}");
            if let Some(service) = options.get(&key) {
                return Ok(service.clone());
            }
        }
    }

    let kind_key = format!("{DISPATCH_SERVICE_KEY}.{kind}");
    if let Some(service) = options.get(&kind_key) {
        return Ok(service.clone());
    }

    if let Some(service) = options.get(DISPATCH_SERVICE_KEY) {
        return Ok(service.clone());
    }

    Err(DispatchError::NoService {
        table: table.to_string(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolution_is_deterministic() {
        let options = options(&[(DISPATCH_SERVICE_KEY, "cs1")]);
        let hints = ExecutionHints::new();
        for _ in 0..3 {
            let service =
                resolve("t", &options, CompactionKind::System, &hints).expect("resolve");
            assert_eq!(service, "cs1");
        }
    }

    #[test]
    fn user_alias_overrides_the_default() {
        let options = options(&[
            (DISPATCH_SERVICE_KEY, "cs3"),
            ("compaction.dispatcher.service.user.special", "cs4"),
        ]);
        let hints = ExecutionHints::new().with(COMPACTION_TYPE_HINT, "special");
        assert_eq!(
            resolve("t", &options, CompactionKind::User, &hints).expect("resolve"),
            "cs4"
        );
        // The alias is ignored for system dispatch.
        assert_eq!(
            resolve("t", &options, CompactionKind::System, &hints).expect("resolve"),
            "cs3"
        );
        // An unmapped alias falls back to the default.
        let hints = ExecutionHints::new().with(COMPACTION_TYPE_HINT, "other");
        assert_eq!(
            resolve("t", &options, CompactionKind::User, &hints).expect("resolve"),
            "cs3"
        );
    }

    #[test]
    fn per_kind_service_beats_the_default() {
        let options = options(&[
            (DISPATCH_SERVICE_KEY, "cs1"),
            ("compaction.dispatcher.service.user", "cs2"),
        ]);
        let hints = ExecutionHints::new();
        assert_eq!(
            resolve("t", &options, CompactionKind::User, &hints).expect("resolve"),
            "cs2"
        );
        assert_eq!(
            resolve("t", &options, CompactionKind::System, &hints).expect("resolve"),
            "cs1"
        );
    }

    #[test]
    fn unresolvable_dispatch_is_an_error() {
        let hints = ExecutionHints::new();
        let err = resolve("t", &BTreeMap::new(), CompactionKind::System, &hints)
            .expect_err("no service");
        assert!(matches!(err, DispatchError::NoService { .. }));
    }
}

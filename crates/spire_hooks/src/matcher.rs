//! Turns committed mutations into dispatch requests.
//!
//! For every `after` rule matching the entity and operation, the rule's job
//! names are resolved against the live artifact and one request is handed to
//! the dispatch port. Unknown job names are skipped with a warning; a rule
//! with no resolvable job produces no request. Nothing here fails the
//! caller: a missing artifact or port, an empty hook table and a failed
//! enqueue all degrade to a logged no-op.

use crate::dispatch::{DispatchRequest, JobDispatchPort};
use indexmap::IndexMap;
use spire_core::{ArtifactStore, DispatchId, Operation, Record, snapshot};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hook-to-job bridge
#[derive(Clone)]
pub struct HookMatcher {
    store: Arc<ArtifactStore>,
    port: Option<Arc<dyn JobDispatchPort>>,
}

impl HookMatcher {
    /// Create a matcher reading from `store`, dispatching to `port`
    #[must_use]
    pub fn new(store: Arc<ArtifactStore>, port: Arc<dyn JobDispatchPort>) -> Self {
        Self {
            store,
            port: Some(port),
        }
    }

    /// Create a matcher with no dispatch port; evaluation is a no-op
    #[must_use]
    pub fn detached(store: Arc<ArtifactStore>) -> Self {
        Self { store, port: None }
    }

    /// Evaluate a committed mutation.
    ///
    /// Returns the number of requests accepted by the port.
    pub fn evaluate(&self, entity: &str, operation: Operation, record: Option<&Record>) -> usize {
        let Some(port) = &self.port else {
            return 0;
        };
        let Some(artifact) = self.store.get() else {
            return 0;
        };

        let mut accepted = 0;
        for rule in artifact.hooks().iter().filter(|r| r.fires_for(entity, operation)) {
            let mut resolved = IndexMap::new();
            for name in &rule.jobs {
                match artifact.job(name) {
                    Some(spec) => {
                        resolved.insert(name.clone(), spec.clone());
                    }
                    None => warn!(entity, job = %name, "hook references unknown job, skipping"),
                }
            }
            if resolved.is_empty() {
                continue;
            }

            let request = DispatchRequest {
                id: DispatchId::new(),
                entity: entity.to_string(),
                operation,
                job_names: rule.jobs.clone(),
                data_snapshot: snapshot(record),
                resolved_specs: resolved,
            };
            let id = request.id;

            match port.enqueue(request) {
                Ok(()) => {
                    debug!(dispatch_id = %id, entity, operation = %operation, "dispatch enqueued");
                    accepted += 1;
                }
                Err(err) => {
                    warn!(
                        dispatch_id = %id,
                        entity,
                        operation = %operation,
                        error = %err,
                        "dispatch rejected"
                    );
                }
            }
        }
        accepted
    }
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("store", &self.store)
            .field("attached", &self.port.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchError;
    use serde_json::{Value, json};
    use spire_core::{Artifact, HookRule, JobSpec, Timing};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPort {
        requests: Mutex<Vec<DispatchRequest>>,
        reject: bool,
    }

    impl RecordingPort {
        fn taken(&self) -> Vec<DispatchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl JobDispatchPort for RecordingPort {
        fn enqueue(&self, request: DispatchRequest) -> Result<(), DispatchError> {
            if self.reject {
                return Err(DispatchError::QueueFull);
            }
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("record must be an object"),
        }
    }

    fn matcher(artifact: Artifact) -> (HookMatcher, Arc<RecordingPort>) {
        let port = Arc::new(RecordingPort::default());
        let store = Arc::new(ArtifactStore::with_artifact(artifact));
        (HookMatcher::new(store, port.clone()), port)
    }

    fn blog() -> Artifact {
        Artifact::new("blog")
            .with_job(JobSpec::new("notify", "Post"))
            .with_job(JobSpec::new("index", "Post").with_mapping("title", "text"))
    }

    #[test]
    fn test_single_rule_dispatch() {
        let (matcher, port) =
            matcher(blog().with_hook(HookRule::after("Post", Operation::Create, &["notify"])));
        let post = record(json!({"id": 1, "title": "hello"}));

        assert_eq!(matcher.evaluate("Post", Operation::Create, Some(&post)), 1);

        let requests = port.taken();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].entity, "Post");
        assert_eq!(requests[0].job_names, vec!["notify"]);
        assert_eq!(requests[0].data_snapshot, post);
        assert!(requests[0].resolved_specs.contains_key("notify"));
    }

    #[test]
    fn test_non_after_timing_is_inert() {
        let (matcher, port) = matcher(
            blog()
                .with_hook(
                    HookRule::after("Post", Operation::Create, &["notify"])
                        .with_timing(Timing::Before),
                )
                .with_hook(
                    HookRule::after("Post", Operation::Create, &["index"])
                        .with_timing(Timing::Around),
                ),
        );

        assert_eq!(matcher.evaluate("Post", Operation::Create, None), 0);
        assert!(port.taken().is_empty());
    }

    #[test]
    fn test_mismatched_entity_or_operation() {
        let (matcher, port) =
            matcher(blog().with_hook(HookRule::after("Post", Operation::Create, &["notify"])));

        assert_eq!(matcher.evaluate("Comment", Operation::Create, None), 0);
        assert_eq!(matcher.evaluate("Post", Operation::Delete, None), 0);
        assert!(port.taken().is_empty());
    }

    #[test]
    fn test_two_rules_get_independent_snapshots() {
        let (matcher, port) = matcher(
            blog()
                .with_hook(HookRule::after("Post", Operation::Update, &["notify"]))
                .with_hook(HookRule::after("Post", Operation::Update, &["index"])),
        );
        let mut post = record(json!({"id": 7, "title": "draft"}));

        assert_eq!(matcher.evaluate("Post", Operation::Update, Some(&post)), 2);
        post.insert("title".to_string(), json!("edited"));
        post.insert("extra".to_string(), json!(true));

        let mut requests = port.taken();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].job_names, vec!["notify"]);
        assert_eq!(requests[1].job_names, vec!["index"]);
        assert_ne!(requests[0].id, requests[1].id);
        for request in &requests {
            assert_eq!(request.data_snapshot["title"], json!("draft"));
            assert!(!request.data_snapshot.contains_key("extra"));
        }

        // snapshots do not alias each other either
        requests[0]
            .data_snapshot
            .insert("title".to_string(), json!("mutated"));
        assert_eq!(requests[1].data_snapshot["title"], json!("draft"));
    }

    #[test]
    fn test_partial_resolution() {
        let (matcher, port) = matcher(
            blog().with_hook(HookRule::after("Post", Operation::Create, &["notify", "ghost"])),
        );

        assert_eq!(matcher.evaluate("Post", Operation::Create, None), 1);

        let requests = port.taken();
        assert_eq!(requests[0].job_names, vec!["notify", "ghost"]);
        assert_eq!(requests[0].resolved_specs.len(), 1);
        assert!(requests[0].resolved_specs.contains_key("notify"));
        assert_eq!(requests[0].unresolved(), vec!["ghost"]);
    }

    #[test]
    fn test_fully_unresolved_rule_skipped_others_continue() {
        let (matcher, port) = matcher(
            blog()
                .with_hook(HookRule::after("Post", Operation::Create, &["ghost", "phantom"]))
                .with_hook(HookRule::after("Post", Operation::Create, &["index"])),
        );

        assert_eq!(matcher.evaluate("Post", Operation::Create, None), 1);
        let requests = port.taken();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].job_names, vec!["index"]);
    }

    #[test]
    fn test_empty_jobs_no_dispatch() {
        let (matcher, port) =
            matcher(blog().with_hook(HookRule::after("Post", Operation::Create, &[])));
        assert_eq!(matcher.evaluate("Post", Operation::Create, None), 0);
        assert!(port.taken().is_empty());
    }

    #[test]
    fn test_absent_record_becomes_empty_map() {
        let (matcher, port) =
            matcher(blog().with_hook(HookRule::after("Post", Operation::Delete, &["notify"])));

        assert_eq!(matcher.evaluate("Post", Operation::Delete, None), 1);
        assert!(port.taken()[0].data_snapshot.is_empty());
    }

    #[test]
    fn test_missing_artifact_or_port_is_noop() {
        let empty = HookMatcher::new(
            Arc::new(ArtifactStore::new()),
            Arc::new(RecordingPort::default()),
        );
        assert_eq!(empty.evaluate("Post", Operation::Create, None), 0);

        let store = Arc::new(ArtifactStore::with_artifact(
            blog().with_hook(HookRule::after("Post", Operation::Create, &["notify"])),
        ));
        let detached = HookMatcher::detached(store);
        assert_eq!(detached.evaluate("Post", Operation::Create, None), 0);

        let (no_hooks, port) = matcher(blog());
        assert_eq!(no_hooks.evaluate("Post", Operation::Create, None), 0);
        assert!(port.taken().is_empty());
    }

    #[test]
    fn test_enqueue_failure_is_swallowed() {
        let port = Arc::new(RecordingPort {
            reject: true,
            ..RecordingPort::default()
        });
        let store = Arc::new(ArtifactStore::with_artifact(
            blog().with_hook(HookRule::after("Post", Operation::Create, &["notify"])),
        ));
        let matcher = HookMatcher::new(store, port.clone());

        assert_eq!(matcher.evaluate("Post", Operation::Create, None), 0);
        assert!(port.taken().is_empty());
    }

    #[test]
    fn test_concurrent_evaluate_no_loss_no_duplication() {
        let (matcher, port) = matcher(
            blog()
                .with_hook(HookRule::after("Post", Operation::Create, &["notify"]))
                .with_hook(HookRule::after("Post", Operation::Create, &["index"])),
        );

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let matcher = matcher.clone();
                std::thread::spawn(move || {
                    let post = record(json!({"id": i}));
                    matcher.evaluate("Post", Operation::Create, Some(&post))
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }

        let requests = port.taken();
        assert_eq!(requests.len(), 20);
        for job in ["notify", "index"] {
            let ids: Vec<i64> = requests
                .iter()
                .filter(|r| r.job_names == vec![job])
                .map(|r| r.data_snapshot["id"].as_i64().unwrap())
                .collect();
            assert_eq!(ids.len(), 10);
            let unique: HashSet<i64> = ids.into_iter().collect();
            assert_eq!(unique, (0..10).collect());
        }
    }

    #[test]
    fn test_reads_swapped_artifact() {
        let port = Arc::new(RecordingPort::default());
        let store = Arc::new(ArtifactStore::with_artifact(blog()));
        let matcher = HookMatcher::new(store.clone(), port.clone());
        assert_eq!(matcher.evaluate("Post", Operation::Create, None), 0);

        store.swap(
            blog().with_hook(HookRule::after("Post", Operation::Create, &["notify"])),
            spire_core::Digest::compute(b"v2"),
        );
        assert_eq!(matcher.evaluate("Post", Operation::Create, None), 1);
        assert_eq!(port.taken().len(), 1);
    }
}

//! Built-in checks.
//!
//! Each suite module provides its check bodies; this module registers them
//! into orchestrator groups and carries their catalog entries.
//!
//! - Platform alteration: kernel taint inspection of the local node
//!
//! # Graceful Degradation
//!
//! Checks never panic. A host without the inspected interface skips the
//! check through its skip predicate; unreadable data is reported as a
//! non-compliant object rather than an error.

pub mod platform;

use crate::data::catalog::{Catalog, CategoryClassification, Classification, EntrySpec, TAG_COMMON};
use crate::engine::check::Check;
use crate::Orchestrator;

use platform::TaintInspector;

pub const PLATFORM_ALTERATION: &str = "platform-alteration";

/// Catalog entries of the built-in checks.
pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.add_entry(EntrySpec {
        test_id: platform::TAINTED_NODE_KERNEL.to_string(),
        suite: PLATFORM_ALTERATION.to_string(),
        description: "Ensures that the Node(s) hosting workloads do not utilize tainted kernels. \
            This test case is especially important to support Highly Available workloads, since \
            when a workload is re-instantiated on a backup Node, that Node's kernel may not have \
            the same hacks."
            .to_string(),
        remediation: "Test failure indicates that the underlying Node's kernel is tainted. \
            Ensure that you have not altered underlying Node(s) kernels in order to run the \
            workload."
            .to_string(),
        exception_process: "If taint is necessary, document details of the taint and why it's \
            needed by workload or environment."
            .to_string(),
        best_practice_reference:
            "https://redhat-best-practices-for-k8s.github.io/guide/#k8s-best-practices-platform-configuration"
                .to_string(),
        category_classification: CategoryClassification::all(Classification::Mandatory),
        tags: vec![TAG_COMMON.to_string()],
        ..EntrySpec::default()
    });
    catalog
}

/// Check ID the way the catalog builds it.
pub fn check_id(suite: &str, test_id: &str) -> String {
    format!("{}-{}", suite, test_id)
}

/// Register every built-in check into `orchestrator`.
///
/// `accepted_kernel_taints` names modules allowed to taint the kernel.
pub fn load_checks(orchestrator: &Orchestrator, accepted_kernel_taints: &[String]) {
    let inspector = TaintInspector::new("/", accepted_kernel_taints);
    load_platform_checks(orchestrator, inspector);
}

/// Register the platform alteration suite, reading taint state through
/// `inspector`.
pub fn load_platform_checks(orchestrator: &Orchestrator, inspector: TaintInspector) {
    let group = orchestrator.new_checks_group(PLATFORM_ALTERATION);

    let id = check_id(PLATFORM_ALTERATION, platform::TAINTED_NODE_KERNEL);
    let skip_inspector = inspector.clone();
    group.add(
        Check::new(id.clone(), [TAG_COMMON, id.as_str()])
            .with_skip_check_fn(move || platform::skip_if_no_taint_mask(&skip_inspector))
            .with_check_fn(move |check: &Check| platform::test_tainted_kernel(check, &inspector)),
    );
}

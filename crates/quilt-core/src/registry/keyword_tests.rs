use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use quilt_protocols::{
    ContributeDefinition, ContributionKeywordDefinition, ContributionPointDefinition,
};

use super::*;

fn registry(definition: ContributionKeywordDefinition) -> KeywordRegistry {
    KeywordRegistry::new(
        definition,
        "host",
        Arc::new(NoHooks),
        AssertionOptions::default(),
        Arc::new(Diagnostics::new(true)),
    )
}

fn request_ctx(contributor: &str) -> RequestContributionContext {
    RequestContributionContext::new(contributor, "host.commands", Vec::new())
}

fn commands_keyword() -> ContributionKeywordDefinition {
    ContributionKeywordDefinition::new("host.commands").with_contribution_points()
}

#[test]
fn test_contribution_point_registration_and_queries() {
    let registry = registry(commands_keyword());
    let ctx = request_ctx("host");
    registry
        .request_contribution_points(
            &ctx,
            &[ContributionPointDefinition::new("host.palette")],
        )
        .unwrap();

    assert!(registry.is_contribution_point_exist("host.palette"));
    assert!(!registry.is_contribution_point_exist("host.missing"));
    assert!(registry.is_contribution_point_valid("host", "host.palette"));
    assert!(!registry.is_contribution_point_valid("other", "host.palette"));
    assert_eq!(registry.contribution_points_of("host").len(), 1);

    let (owner, def) = registry
        .find_contribution_point_definition("host.palette")
        .unwrap();
    assert_eq!(owner, "host");
    assert_eq!(def.name, "host.palette");
}

#[test]
fn test_contribution_requires_resolvable_cp() {
    let registry = registry(commands_keyword());
    let ctx = request_ctx("ext");

    let err = registry
        .request_contributions(
            &ctx,
            &[ContributeDefinition::new("ext.run").with_cp("host.palette")],
        )
        .unwrap_err();
    assert!(err.to_string().contains("unresolved contribution point"));
    assert!(!registry.is_contribute_exist("ext.run"));

    registry
        .request_contribution_points(
            &request_ctx("host"),
            &[ContributionPointDefinition::new("host.palette")],
        )
        .unwrap();
    registry
        .request_contributions(
            &ctx,
            &[ContributeDefinition::new("ext.run").with_cp("host.palette")],
        )
        .unwrap();
    assert!(registry.is_contribute_exist("ext.run"));
    assert!(registry.is_contribute_valid("ext", "ext.run"));
    assert!(!registry.is_contribute_valid("other", "ext.run"));
}

#[test]
fn test_missing_cp_rejected_when_points_supported() {
    let registry = registry(commands_keyword());
    let err = registry
        .request_contributions(&request_ctx("ext"), &[ContributeDefinition::new("ext.run")])
        .unwrap_err();
    assert!(err.to_string().contains("requires a cp target"));
}

#[test]
fn test_invalid_entry_rejects_whole_batch() {
    let registry = registry(commands_keyword());
    registry
        .request_contribution_points(
            &request_ctx("host"),
            &[ContributionPointDefinition::new("host.palette")],
        )
        .unwrap();

    let ctx = request_ctx("ext");
    let result = registry.request_contributions(
        &ctx,
        &[
            ContributeDefinition::new("ext.good").with_cp("host.palette"),
            ContributeDefinition::new("ext.bad").with_cp("host.missing"),
        ],
    );
    assert!(result.is_err());
    assert!(!registry.is_contribute_exist("ext.good"));
    assert!(!registry.is_contribute_exist("ext.bad"));
}

#[test]
fn test_permissive_batch_rejection_collects_and_registers_nothing() {
    let diagnostics = Arc::new(Diagnostics::new(false));
    let registry = KeywordRegistry::new(
        commands_keyword(),
        "host",
        Arc::new(NoHooks),
        AssertionOptions::default(),
        diagnostics.clone(),
    );

    registry
        .request_contributions(
            &request_ctx("ext"),
            &[ContributeDefinition::new("ext.bad").with_cp("host.missing")],
        )
        .unwrap();
    assert_eq!(diagnostics.entries().len(), 1);
    assert!(!registry.is_contribute_exist("ext.bad"));
}

#[test]
fn test_dynamic_sub_path_resolution() {
    let definition = ContributionKeywordDefinition::new("host.commands")
        .with_contribution_points()
        .with_dynamics();
    let registry = registry(definition);
    registry
        .request_contribution_points(
            &request_ctx("host"),
            &[
                ContributionPointDefinition::new("host.menu").with_dynamics(),
                ContributionPointDefinition::new("host.fixed"),
            ],
        )
        .unwrap();

    registry
        .request_contributions(
            &request_ctx("ext"),
            &[ContributeDefinition::new("ext.open").with_cp("host.menu:file")],
        )
        .unwrap();
    assert!(registry.is_contribute_exist("ext.open"));
    assert_eq!(
        registry.resolve_contribution_point_name("host.menu:file").as_deref(),
        Some("host.menu")
    );

    let err = registry
        .request_contributions(
            &request_ctx("ext"),
            &[ContributeDefinition::new("ext.pin").with_cp("host.fixed:sub")],
        )
        .unwrap_err();
    assert!(err.to_string().contains("dynamic sub-paths"));
}

#[test]
fn test_dynamics_rejected_when_keyword_does_not_support_them() {
    let registry = registry(commands_keyword());
    let err = registry
        .request_contribution_points(
            &request_ctx("host"),
            &[ContributionPointDefinition::new("host.menu").with_dynamics()],
        )
        .unwrap_err();
    assert!(err.to_string().contains("does not support dynamics"));
    assert!(!registry.is_contribution_point_exist("host.menu"));
}

#[test]
fn test_revoke_contributions_by_name() {
    let definition = ContributionKeywordDefinition::new("host.commands");
    let registry = registry(definition);
    let ctx = request_ctx("ext");
    registry
        .request_contributions(
            &ctx,
            &[
                ContributeDefinition::new("ext.a"),
                ContributeDefinition::new("ext.b"),
            ],
        )
        .unwrap();

    registry
        .request_revoke_contributions(&ctx, &[ContributeDefinition::new("ext.a")])
        .unwrap();
    assert!(!registry.is_contribute_exist("ext.a"));
    assert!(registry.is_contribute_exist("ext.b"));
    assert_eq!(registry.contributions_of("ext").len(), 1);
}

struct GatingHooks {
    allow: bool,
    after_calls: AtomicUsize,
    destroyed: AtomicUsize,
}

impl KeywordHooks for GatingHooks {
    fn before_request_contributions(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributeDefinition],
    ) -> bool {
        self.allow
    }

    fn after_request_contributions(
        &self,
        _ctx: &RequestContributionContext,
        _defs: &[ContributeDefinition],
    ) {
        self.after_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_before_hook_returning_false_skips_batch() {
    let hooks = Arc::new(GatingHooks {
        allow: false,
        after_calls: AtomicUsize::new(0),
        destroyed: AtomicUsize::new(0),
    });
    let registry = KeywordRegistry::new(
        ContributionKeywordDefinition::new("host.commands"),
        "host",
        hooks.clone(),
        AssertionOptions::default(),
        Arc::new(Diagnostics::new(true)),
    );

    registry
        .request_contributions(&request_ctx("ext"), &[ContributeDefinition::new("ext.a")])
        .unwrap();
    assert!(!registry.is_contribute_exist("ext.a"));
    assert_eq!(hooks.after_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_after_hook_runs_on_accepted_batch() {
    let hooks = Arc::new(GatingHooks {
        allow: true,
        after_calls: AtomicUsize::new(0),
        destroyed: AtomicUsize::new(0),
    });
    let registry = KeywordRegistry::new(
        ContributionKeywordDefinition::new("host.commands"),
        "host",
        hooks.clone(),
        AssertionOptions::default(),
        Arc::new(Diagnostics::new(true)),
    );

    registry
        .request_contributions(&request_ctx("ext"), &[ContributeDefinition::new("ext.a")])
        .unwrap();
    assert_eq!(hooks.after_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_skip_list_bypasses_validity_checks() {
    let options = AssertionOptions {
        skip_contribute_check_keywords: vec!["host.commands".to_string()],
        ..AssertionOptions::default()
    };
    let registry = KeywordRegistry::new(
        ContributionKeywordDefinition::new("host.commands"),
        "host",
        Arc::new(NoHooks),
        options,
        Arc::new(Diagnostics::new(true)),
    );

    assert!(registry.is_contribute_valid("anyone", "anything"));
    assert!(registry.is_contribution_point_valid("anyone", "anything"));
}

#[test]
fn test_exempt_contributor_bypasses_contribution_checks() {
    let options = AssertionOptions {
        ignore_contributes_check_manifests: vec!["legacy".to_string()],
        ..AssertionOptions::default()
    };
    let registry = KeywordRegistry::new(
        commands_keyword(),
        "host",
        Arc::new(NoHooks),
        options,
        Arc::new(Diagnostics::new(true)),
    );

    // No point named "host.missing" exists, yet the exempted contributor
    // registers anyway.
    registry
        .request_contributions(
            &request_ctx("legacy"),
            &[ContributeDefinition::new("props.x").with_cp("host.missing")],
        )
        .unwrap();
    assert!(registry.is_contribute_exist("props.x"));
    assert!(registry.is_contribute_valid("legacy", "never.registered"));

    // Everyone else still goes through the full check.
    let err = registry
        .request_contributions(
            &request_ctx("ext"),
            &[ContributeDefinition::new("ext.run").with_cp("host.missing")],
        )
        .unwrap_err();
    assert!(err.to_string().contains("unresolved contribution point"));
    assert!(!registry.is_contribute_valid("ext", "never.registered"));
}

#[test]
fn test_exempt_contributor_bypasses_contribution_point_checks() {
    let options = AssertionOptions {
        ignore_contribution_point_check_manifests: vec!["legacy".to_string()],
        ..AssertionOptions::default()
    };
    let registry = KeywordRegistry::new(
        commands_keyword(),
        "host",
        Arc::new(NoHooks),
        options,
        Arc::new(Diagnostics::new(true)),
    );

    // The keyword does not support dynamics; the exemption lets the point in.
    registry
        .request_contribution_points(
            &request_ctx("legacy"),
            &[ContributionPointDefinition::new("legacy.menu").with_dynamics()],
        )
        .unwrap();
    assert!(registry.is_contribution_point_exist("legacy.menu"));
    assert!(registry.is_contribution_point_valid("legacy", "never.registered"));

    let err = registry
        .request_contribution_points(
            &request_ctx("host"),
            &[ContributionPointDefinition::new("host.menu").with_dynamics()],
        )
        .unwrap_err();
    assert!(err.to_string().contains("does not support dynamics"));
}

#[test]
fn test_destroy_runs_hook_and_clears_state() {
    let hooks = Arc::new(GatingHooks {
        allow: true,
        after_calls: AtomicUsize::new(0),
        destroyed: AtomicUsize::new(0),
    });
    let registry = KeywordRegistry::new(
        ContributionKeywordDefinition::new("host.commands"),
        "host",
        hooks.clone(),
        AssertionOptions::default(),
        Arc::new(Diagnostics::new(true)),
    );
    registry
        .request_contributions(&request_ctx("ext"), &[ContributeDefinition::new("ext.a")])
        .unwrap();

    registry.destroy();
    assert_eq!(hooks.destroyed.load(Ordering::SeqCst), 1);
    assert!(!registry.is_contribute_exist("ext.a"));
}

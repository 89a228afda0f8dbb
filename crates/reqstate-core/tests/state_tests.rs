//! Container tests — registries, stores, accessors, resolution rules and
//! record conversion, exercised through the public `RequestState` API.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use reqstate_core::serializer::{format_started, parse_started};
use reqstate_core::*;
use serde_json::json;

fn frozen_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 2).unwrap() + Duration::microseconds(123_456)
}

fn entity(id: i64) -> IdentityRef {
    Entity::new(id).into_ref()
}

/// Sites 1–123, tenant 40/41, workspace 50/51, user 7, admin 8, root 9, visitor 10.
/// Site 123 defaults to tenant 40 and workspace 50.
fn repositories() -> RepositorySet {
    let tenants = MemoryRepository::with_entities(RepositoryKind::TENANT, [entity(40), entity(41)]);
    let workspaces = MemoryRepository::with_entities(RepositoryKind::WORKSPACE, [entity(50), entity(51)]);

    let sites = MemoryRepository::new(RepositoryKind::SITE);
    for id in [1, 2, 3, 5, 7, 11, 22] {
        sites.insert(Entity::new(id));
    }
    sites.insert(
        Entity::new(123)
            .with_label("Main")
            .with_default_tenant(entity(40))
            .with_default_workspace(entity(50)),
    );

    RepositorySet::new()
        .with(sites)
        .with(tenants)
        .with(workspaces)
        .with(MemoryRepository::with_entities(RepositoryKind::USER, [entity(7)]))
        .with(MemoryRepository::with_entities(RepositoryKind::ADMIN, [entity(8)]))
        .with(MemoryRepository::with_entities(RepositoryKind::ROOT, [entity(9)]))
        .with(MemoryRepository::with_entities(RepositoryKind::VISITOR, [entity(10)]))
}

fn state(registry: AttributeRegistry) -> RequestState<LocalStore> {
    RequestState::new(Arc::new(registry), Arc::new(repositories()), LocalStore::new())
}

fn frozen(registry: AttributeRegistry) -> (RequestState<LocalStore>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(frozen_time()));
    let state = state(registry).with_clock(clock.clone());
    (state, clock)
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

mod registry {
    use super::*;

    #[test]
    fn standard_has_seven_current_slots() {
        let registry = AttributeRegistry::standard();
        assert_eq!(registry.len(), 7);
        assert!(registry.contains(Slots::CURRENT_VISITOR));
        assert!(!registry.contains(Slots::TARGET_SITE));

        let serialized: Vec<&str> = registry.record_specs().map(|s| s.name.as_str()).collect();
        assert_eq!(
            serialized,
            vec![
                Slots::CURRENT_SITE,
                Slots::CURRENT_TENANT,
                Slots::CURRENT_WORKSPACE,
                Slots::CURRENT_USER
            ]
        );
    }

    #[test]
    fn extended_targets_share_repository_kinds() {
        let registry = AttributeRegistry::extended();
        assert_eq!(registry.len(), 10);
        assert_eq!(
            registry.spec(Slots::TARGET_SITE).unwrap().repository,
            registry.spec(Slots::CURRENT_SITE).unwrap().repository
        );
        assert_eq!(
            registry.spec(Slots::TARGET_TENANT).unwrap().repository,
            RepositoryKind::TENANT
        );
    }

    #[test]
    fn restricted_is_site_only() {
        let registry = AttributeRegistry::restricted();
        let names: Vec<&str> = registry.specs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![Slots::CURRENT_SITE, Slots::TARGET_SITE]);
    }

    #[test]
    fn builder_rejects_duplicates() {
        let err = AttributeRegistry::builder()
            .slot(Slots::CURRENT_SITE, RepositoryKind::SITE)
            .slot(Slots::CURRENT_SITE, RepositoryKind::SITE)
            .build()
            .unwrap_err();
        assert_eq!(err, StateError::DuplicateSlot(Slots::CURRENT_SITE.into()));
    }

    #[test]
    fn builder_rejects_empty_names() {
        let err = AttributeRegistry::builder()
            .slot("", RepositoryKind::SITE)
            .build()
            .unwrap_err();
        assert_eq!(err.error_code(), reqstate_protocol::StateErrorCode::InvalidConfig);
    }

    #[test]
    fn derived_registry_extends_its_base() {
        let derived = AttributeRegistry::standard()
            .to_builder()
            .without(Slots::CURRENT_VISITOR)
            .slot(Slots::TARGET_SITE, RepositoryKind::SITE)
            .local_slot("current_owner", RepositoryKind::USER)
            .build()
            .unwrap();

        assert_eq!(derived.len(), 8);
        assert!(!derived.contains(Slots::CURRENT_VISITOR));
        assert!(derived.spec(Slots::TARGET_SITE).unwrap().included_in_record);
        assert!(!derived.spec("current_owner").unwrap().included_in_record);
        // the base is untouched
        assert!(AttributeRegistry::standard().contains(Slots::CURRENT_VISITOR));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

mod config {
    use super::*;

    #[test]
    fn preset_with_extra_slots() {
        let config = RegistryConfig::from_json(
            r#"{"preset":"standard","slots":[{"name":"target_site","repository":"site"}]}"#,
        )
        .unwrap();
        let registry = config.build().unwrap();
        assert_eq!(registry.len(), 8);
        assert!(registry.spec(Slots::TARGET_SITE).unwrap().included_in_record);
    }

    #[test]
    fn explicit_slot_list_is_the_whole_registry() {
        let config = RegistryConfig::from_json(
            r#"{"slots":[
                {"name":"current_site","repository":"site"},
                {"name":"current_root","repository":"root","included_in_record":false}
            ]}"#,
        )
        .unwrap();
        let registry = config.build().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.record_specs().count(), 1);
    }

    #[test]
    fn empty_config_is_rejected() {
        let err = RegistryConfig::from_json("{}").unwrap().build().unwrap_err();
        assert!(matches!(err, StateError::InvalidConfig(_)));
    }

    #[test]
    fn preset_names_parse() {
        assert_eq!("extended".parse::<RegistryPreset>().unwrap(), RegistryPreset::Extended);
        assert!("full".parse::<RegistryPreset>().is_err());
        assert_eq!(
            RegistryConfig::from_preset(RegistryPreset::Restricted).build().unwrap(),
            AttributeRegistry::restricted()
        );
    }

    #[test]
    fn fixtures_resolve_site_defaults() {
        let fixtures = FixtureSet::from_json(
            r#"{
                "site": [{"id": 123, "label": "Main", "default_tenant": 40, "default_workspace": "ws-1"}],
                "tenant": [{"id": 40}],
                "workspace": [{"id": "ws-1"}]
            }"#,
        )
        .unwrap();
        let repositories = fixtures.into_repositories().unwrap();

        let site = repositories
            .find(&RepositoryKind::SITE, &IdentityId::Number(123))
            .unwrap()
            .unwrap();
        assert_eq!(site.default_tenant().unwrap().id(), IdentityId::Number(40));
        assert_eq!(
            site.default_workspace().unwrap().id(),
            IdentityId::String("ws-1".into())
        );
    }

    #[test]
    fn fixtures_with_dangling_default_fail() {
        let fixtures =
            FixtureSet::from_json(r#"{"site": [{"id": 1, "default_tenant": 99}]}"#).unwrap();
        assert!(matches!(
            fixtures.into_repositories(),
            Err(StateError::InvalidConfig(_))
        ));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stores and lifecycle
// ─────────────────────────────────────────────────────────────────────────────

mod lifecycle {
    use super::*;

    #[test]
    fn fresh_state_has_lazy_defaults() {
        let state = state(AttributeRegistry::standard());
        assert!(!state.is_present());

        let before = Utc::now();
        let started = state.started();
        assert!(state.is_present());
        assert!(started >= before - Duration::seconds(1));
        assert!(started <= Utc::now());

        assert!(state.request_id().is_none());
        assert!(state.locale().is_none());
        assert!(state.current_site().is_none());
        assert!(state.current_user_id().is_none());
    }

    #[test]
    fn started_is_stable_for_the_record() {
        let (state, clock) = frozen(AttributeRegistry::standard());
        let first = state.started();
        clock.advance(Duration::seconds(30));
        assert_eq!(state.started(), first);
    }

    #[test]
    fn clear_isolates_next_request() {
        let (state, clock) = frozen(AttributeRegistry::standard());
        state.set_current_site(Some(entity(5))).unwrap();
        state.set_request_id(Some("req-1".into()));
        state.set_locale(Some("nl".parse().unwrap()));

        clock.advance(Duration::seconds(10));
        state.clear();

        assert!(state.current_site().is_none());
        assert!(state.request_id().is_none());
        assert!(state.locale().is_none());
        assert_eq!(state.started(), frozen_time() + Duration::seconds(10));
    }

    #[test]
    fn clear_is_idempotent() {
        let state = state(AttributeRegistry::standard());
        state.clear();
        state.clear();
        assert!(!state.is_present());
    }

    #[test]
    fn scope_guard_clears_on_drop() {
        let state = state(AttributeRegistry::standard());
        {
            let scoped = state.scoped();
            scoped.set_current_user(Some(entity(7))).unwrap();
            assert!(scoped.current_user().is_some());
        }
        assert!(!state.is_present());
        assert!(state.current_user().is_none());
    }

    #[test]
    fn local_store_take_moves_the_record_out() {
        let state = state(AttributeRegistry::standard());
        state.set_current_site(Some(entity(1))).unwrap();
        let record = state.store().take().unwrap();
        assert_eq!(record.slot(Slots::CURRENT_SITE).unwrap().id(), IdentityId::Number(1));
        assert!(!state.is_present());
    }

    #[test]
    fn thread_store_is_per_thread() {
        let registry = Arc::new(AttributeRegistry::standard());
        let repositories = Arc::new(repositories());
        let state = RequestState::new(registry.clone(), repositories.clone(), ThreadStore);
        state.set_current_site(Some(entity(1))).unwrap();

        // another handle on the same thread sees the same record
        let same_thread = RequestState::new(registry.clone(), repositories.clone(), ThreadStore);
        assert_eq!(same_thread.current_site_id(), Some(IdentityId::Number(1)));

        let other = std::thread::spawn(move || {
            let state = RequestState::new(registry, repositories, ThreadStore);
            state.current_site_id()
        })
        .join()
        .unwrap();
        assert!(other.is_none());

        state.clear();
        assert!(same_thread.current_site().is_none());
    }

    #[tokio::test]
    async fn task_store_isolates_tasks() {
        let state = RequestState::new(
            Arc::new(AttributeRegistry::standard()),
            Arc::new(repositories()),
            TaskStore,
        );

        let mut handles = Vec::new();
        for id in [1_i64, 2, 3] {
            let state = state.clone();
            handles.push(tokio::spawn(TaskStore::scope(async move {
                state.set_current_site_id(Some(id.into())).unwrap();
                tokio::task::yield_now().await;
                state.current_site_id()
            })));
        }

        for (handle, id) in handles.into_iter().zip([1_i64, 2, 3]) {
            assert_eq!(handle.await.unwrap(), Some(IdentityId::Number(id)));
        }
    }

    #[tokio::test]
    async fn task_scope_starts_empty_and_is_dropped_with_the_scope() {
        let state = RequestState::new(
            Arc::new(AttributeRegistry::standard()),
            Arc::new(repositories()),
            TaskStore,
        );

        let inner = state.clone();
        let seen = TaskStore::scope(async move {
            assert!(TaskStore::in_scope());
            assert!(!inner.is_present());
            inner.set_current_user_id(Some(7.into())).unwrap();
            inner.current_user_id()
        })
        .await;
        assert_eq!(seen, Some(IdentityId::Number(7)));

        let after = TaskStore::sync_scope(|| state.current_user_id());
        assert!(after.is_none());
    }

    #[test]
    fn task_store_outside_scope_uses_thread_record() {
        assert!(!TaskStore::in_scope());
        let state = RequestState::new(
            Arc::new(AttributeRegistry::standard()),
            Arc::new(repositories()),
            TaskStore,
        );
        state.set_current_site(Some(entity(3))).unwrap();

        let thread = RequestState::new(
            Arc::new(AttributeRegistry::standard()),
            Arc::new(repositories()),
            ThreadStore,
        );
        assert_eq!(thread.current_site_id(), Some(IdentityId::Number(3)));
        state.clear();
        assert!(!thread.is_present());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Slot accessors
// ─────────────────────────────────────────────────────────────────────────────

mod accessors {
    use super::*;

    #[test]
    fn setting_a_value_exposes_its_id() {
        let state = state(AttributeRegistry::standard());
        let site = entity(11);
        state.set_current_site(Some(site.clone())).unwrap();
        assert_eq!(state.current_site(), Some(site));
        assert_eq!(state.current_site_id(), Some(IdentityId::Number(11)));
    }

    #[test]
    fn setting_an_id_resolves_through_the_repository() {
        let state = state(AttributeRegistry::standard());
        let resolved = state.set_current_site_id(Some(22.into())).unwrap();
        assert_eq!(resolved, Some(entity(22)));
        assert_eq!(state.current_site(), Some(entity(22)));
        assert_eq!(state.current_site_id(), Some(IdentityId::Number(22)));
    }

    #[test]
    fn repository_miss_empties_the_slot() {
        let state = state(AttributeRegistry::standard());
        state.set_current_site_id(Some(1.into())).unwrap();
        let resolved = state.set_current_site_id(Some(404.into())).unwrap();
        assert!(resolved.is_none());
        assert!(state.current_site().is_none());
    }

    #[test]
    fn setting_no_id_empties_the_slot() {
        let state = state(AttributeRegistry::standard());
        state.set_current_user_id(Some(7.into())).unwrap();
        state.set_current_user_id(None).unwrap();
        assert!(state.current_user().is_none());
    }

    #[test]
    fn value_setter_does_not_check_repository_kind() {
        let state = state(AttributeRegistry::standard());
        // a tenant entity in the site slot is the caller's business
        state.set_current_site(Some(entity(40))).unwrap();
        assert_eq!(state.current_site_id(), Some(IdentityId::Number(40)));
    }

    #[test]
    fn generic_and_typed_accessors_share_slots() {
        let state = state(AttributeRegistry::extended());
        state.set(Slots::TARGET_TENANT, Some(entity(41))).unwrap();
        assert_eq!(state.target_tenant_id(), Some(IdentityId::Number(41)));
        state.set_target_workspace_id(Some(51.into())).unwrap();
        assert_eq!(state.get_id(Slots::TARGET_WORKSPACE), Some(IdentityId::Number(51)));
    }

    #[test]
    fn slots_outside_the_registry() {
        let state = state(AttributeRegistry::restricted());
        assert_eq!(
            state.set_current_user(Some(entity(7))).unwrap_err(),
            StateError::UnknownSlot(Slots::CURRENT_USER.into())
        );
        assert_eq!(
            state.set_current_tenant_id(Some(40.into())).unwrap_err(),
            StateError::UnknownSlot(Slots::CURRENT_TENANT.into())
        );
        assert!(state.current_user().is_none());
        assert!(state.get("current_pet").is_none());
    }

    #[test]
    fn missing_repository_is_an_error() {
        let registry = AttributeRegistry::builder()
            .slot("current_owner", RepositoryKind::new("owner"))
            .build()
            .unwrap();
        let state = state(registry);
        assert_eq!(
            state.set_id("current_owner", Some(1.into())).unwrap_err(),
            StateError::NoRepository("owner".into())
        );
        // clearing needs no lookup
        assert!(state.set_id("current_owner", None).unwrap().is_none());
    }

    #[test]
    fn aliased_repository_kind_resolves() {
        let mut repositories = repositories();
        repositories.alias(RepositoryKind::new("owner"), &RepositoryKind::USER).unwrap();
        let registry = AttributeRegistry::builder()
            .slot("current_owner", RepositoryKind::new("owner"))
            .build()
            .unwrap();
        let state = RequestState::new(Arc::new(registry), Arc::new(repositories), LocalStore::new());
        state.set_id("current_owner", Some(7.into())).unwrap();
        assert_eq!(state.get_id("current_owner"), Some(IdentityId::Number(7)));
    }

    #[test]
    fn shared_repository_sees_later_inserts() {
        let users = Arc::new(MemoryRepository::new(RepositoryKind::USER));
        let repositories = RepositorySet::new().with(users.clone());
        let state = RequestState::new(
            Arc::new(AttributeRegistry::standard()),
            Arc::new(repositories),
            LocalStore::new(),
        );

        assert!(state.set_current_user_id(Some(70.into())).unwrap().is_none());
        users.insert(Entity::new(70).with_label("late"));
        assert!(state.set_current_user_id(Some(70.into())).unwrap().is_some());
        assert_eq!(users.len(), 1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

mod metadata {
    use super::*;

    #[test]
    fn started_setter_falls_back_to_now() {
        let (state, clock) = frozen(AttributeRegistry::standard());
        let earlier = frozen_time() - Duration::hours(1);
        state.set_started(Some(earlier));
        assert_eq!(state.started(), earlier);

        clock.advance(Duration::minutes(5));
        state.set_started(None);
        assert_eq!(state.started(), frozen_time() + Duration::minutes(5));
    }

    #[test]
    fn duration_is_fractional_seconds() {
        let (state, clock) = frozen(AttributeRegistry::standard());
        state.started();
        clock.advance(Duration::milliseconds(1_500));
        assert_eq!(state.duration(), 1.5);
        clock.advance(Duration::microseconds(250));
        assert!((state.duration() - 1.50025).abs() < 1e-9);
    }

    #[test]
    fn ensure_request_id_generates_once() {
        let state = state(AttributeRegistry::standard());
        let generated = state.ensure_request_id();
        assert_eq!(generated.len(), 36);
        assert_eq!(state.ensure_request_id(), generated);
        assert_eq!(state.request_id(), Some(generated));

        state.set_request_id(Some("given".into()));
        assert_eq!(state.ensure_request_id(), "given");
    }

    #[test]
    fn view_context_is_opaque() {
        let state = state(AttributeRegistry::standard());
        state.set_view_context(Some(Arc::new(String::from("layout:admin"))));
        let context = state.view_context().unwrap();
        assert_eq!(context.downcast_ref::<String>().unwrap(), "layout:admin");
    }

    #[test]
    fn snapshot_reflects_the_record() {
        let (state, _clock) = frozen(AttributeRegistry::standard());
        state.set_locale(Some("en-GB".parse().unwrap()));
        state.set_current_site(Some(entity(2))).unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.started(), frozen_time());
        assert_eq!(snapshot.locale().unwrap().as_str(), "en-GB");
        assert!(snapshot.slot(Slots::CURRENT_SITE).is_some());
        assert!(snapshot.request_id().is_none());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// with_current
// ─────────────────────────────────────────────────────────────────────────────

mod with_current {
    use super::*;

    fn main_site(state: &RequestState<LocalStore>) -> IdentityRef {
        state
            .repositories()
            .find(&RepositoryKind::SITE, &IdentityId::Number(123))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn seats_site_defaults() {
        let state = state(AttributeRegistry::standard());
        let site = main_site(&state);

        let seen = state
            .with_current(site, None, None, |s| {
                (s.current_site_id(), s.current_tenant_id(), s.current_workspace_id())
            })
            .unwrap();

        assert_eq!(
            seen,
            (
                Some(IdentityId::Number(123)),
                Some(IdentityId::Number(40)),
                Some(IdentityId::Number(50))
            )
        );
    }

    #[test]
    fn explicit_tenant_and_workspace_win() {
        let state = state(AttributeRegistry::standard());
        let site = main_site(&state);
        state
            .with_current(site, Some(entity(41)), Some(entity(51)), |_| ())
            .unwrap();
        assert_eq!(state.current_tenant_id(), Some(IdentityId::Number(41)));
        assert_eq!(state.current_workspace_id(), Some(IdentityId::Number(51)));
    }

    #[test]
    fn site_without_defaults_leaves_slots_empty() {
        let state = state(AttributeRegistry::standard());
        state.with_current(entity(5), None, None, |_| ()).unwrap();
        assert!(state.current_tenant().is_none());
        assert!(state.current_workspace().is_none());
    }

    #[test]
    fn clears_on_entry_but_not_on_exit() {
        let state = state(AttributeRegistry::standard());
        state.set_current_user(Some(entity(7))).unwrap();
        state.set_request_id(Some("stale".into()));

        state
            .with_current(entity(5), None, None, |s| {
                assert!(s.current_user().is_none());
                assert!(s.request_id().is_none());
                s.set_current_user(Some(entity(7))).unwrap();
            })
            .unwrap();

        // still there afterwards
        assert!(state.current_user().is_some());
        assert_eq!(state.current_site_id(), Some(IdentityId::Number(5)));
    }

    #[test]
    fn with_scope_guard_clears_on_exit() {
        let state = state(AttributeRegistry::standard());
        {
            let scoped = state.scoped();
            scoped.with_current(entity(5), None, None, |_| ()).unwrap();
        }
        assert!(!state.is_present());
    }

    #[test]
    fn needs_tenant_and_workspace_slots() {
        let state = state(AttributeRegistry::restricted());
        state.set_target_site(Some(entity(3))).unwrap();

        let err = state.with_current(entity(5), None, None, |_| ()).unwrap_err();
        assert_eq!(err, StateError::UnknownSlot(Slots::CURRENT_TENANT.into()));
        // nothing was cleared or written
        assert_eq!(state.target_site_id(), Some(IdentityId::Number(3)));
        assert!(state.current_site().is_none());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution rules
// ─────────────────────────────────────────────────────────────────────────────

mod rules {
    use super::*;

    #[test]
    fn target_overrides_current() {
        let state = state(AttributeRegistry::extended());
        state.set_current_site_id(Some(5.into())).unwrap();
        state.set_target_site_id(Some(7.into())).unwrap();
        assert_eq!(state.either_site().unwrap(), Some(entity(7)));
        assert_eq!(state.either_site_id().unwrap(), Some(IdentityId::Number(7)));
    }

    #[test]
    fn current_is_used_without_target() {
        let state = state(AttributeRegistry::extended());
        state.set_current_tenant_id(Some(40.into())).unwrap();
        state.set_current_workspace_id(Some(50.into())).unwrap();
        assert_eq!(state.either_tenant_id().unwrap(), Some(IdentityId::Number(40)));
        assert_eq!(state.either_workspace().unwrap(), Some(entity(50)));
        assert!(state.either_site().unwrap().is_none());
    }

    #[test]
    fn either_needs_a_target_slot() {
        let state = state(AttributeRegistry::restricted());
        assert!(state.has_either(EitherKind::Site));
        assert!(!state.has_either(EitherKind::Tenant));
        assert_eq!(
            state.either_tenant().unwrap_err(),
            StateError::NoTargetSlot("tenant".into())
        );
        assert!(state.either_workspace_id().is_err());

        let standard = super::state(AttributeRegistry::standard());
        standard.set_current_site_id(Some(1.into())).unwrap();
        assert!(matches!(standard.either_site(), Err(StateError::NoTargetSlot(_))));
    }

    #[test]
    fn either_admin_prefers_root() {
        let state = state(AttributeRegistry::standard());
        assert!(state.either_admin().is_none());
        state.set_current_admin_id(Some(8.into())).unwrap();
        assert_eq!(state.either_admin(), Some(entity(8)));
        state.set_current_root_id(Some(9.into())).unwrap();
        assert_eq!(state.either_admin(), Some(entity(9)));
    }

    #[test]
    fn login_and_privilege_walk_opposite_ways() {
        let state = state(AttributeRegistry::standard());
        state.set_current_user_id(Some(7.into())).unwrap();
        state.set_current_admin_id(Some(8.into())).unwrap();
        state.set_current_root_id(Some(9.into())).unwrap();

        assert_eq!(state.current_login(), Some(entity(7)));
        assert_eq!(state.highest_privilege(), Some(entity(9)));
        assert_eq!(state.privilege_level(), PrivilegeLevel::Root);
    }

    #[test]
    fn single_principal_agrees() {
        let state = state(AttributeRegistry::standard());
        state.set_current_admin_id(Some(8.into())).unwrap();
        assert_eq!(state.current_login(), state.highest_privilege());
        assert_eq!(state.privilege_level(), PrivilegeLevel::Admin);
    }

    #[test]
    fn visitors_are_not_logins() {
        let state = state(AttributeRegistry::standard());
        state.set_current_visitor_id(Some(10.into())).unwrap();
        assert!(state.current_login().is_none());
        assert!(state.highest_privilege().is_none());
        assert_eq!(state.privilege_level(), PrivilegeLevel::Visitor);

        state.set_current_user_id(Some(7.into())).unwrap();
        assert_eq!(state.privilege_level(), PrivilegeLevel::User);
    }

    #[test]
    fn nobody_is_anonymous() {
        let state = state(AttributeRegistry::standard());
        assert_eq!(state.privilege_level(), PrivilegeLevel::Anonymous);
        assert!(PrivilegeLevel::Anonymous < PrivilegeLevel::Visitor);
        assert!(PrivilegeLevel::Admin < PrivilegeLevel::Root);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

mod records {
    use super::*;

    fn site_only() -> AttributeRegistry {
        AttributeRegistry::builder()
            .slot(Slots::CURRENT_SITE, RepositoryKind::SITE)
            .build()
            .unwrap()
    }

    #[test]
    fn site_only_record() {
        let (state, _clock) = frozen(site_only());
        state.set_current_site(Some(entity(123))).unwrap();

        let record = state.to_record();
        assert_eq!(
            record.to_value().unwrap(),
            json!({
                "request_id": null,
                "started_string": "2026-10-19T08:15:02.123456Z",
                "locale": null,
                "current_site_id": 123,
            })
        );

        state.clear();
        state.from_record(&record).unwrap();
        assert_eq!(state.current_site_id(), Some(IdentityId::Number(123)));
        assert_eq!(state.started(), frozen_time());
    }

    #[test]
    fn id_setter_shows_up_in_record() {
        let state = state(AttributeRegistry::standard());
        state.set_current_site_id(Some(22.into())).unwrap();
        assert_eq!(state.current_site_id(), Some(IdentityId::Number(22)));
        let record = state.to_record();
        assert_eq!(record.slot_id(Slots::CURRENT_SITE), Some(&IdentityId::Number(22)));
    }

    #[test]
    fn empty_serialized_slots_are_null_and_others_omitted() {
        let state = state(AttributeRegistry::standard());
        state.set_current_admin_id(Some(8.into())).unwrap();

        let value = state.to_record().to_value().unwrap();
        let object = value.as_object().unwrap();
        assert!(object["current_tenant_id"].is_null());
        assert!(object["locale"].is_null());
        assert!(object.contains_key("request_id"));
        // local slots and slots outside the registry never appear
        assert!(!object.contains_key("current_admin_id"));
        assert!(!object.contains_key("target_site_id"));
        assert!(!object.contains_key("either_site_id"));
    }

    #[test]
    fn round_trip_restores_serialized_slots_and_metadata() {
        let (source, _clock) = frozen(AttributeRegistry::extended());
        source.set_current_site_id(Some(5.into())).unwrap();
        source.set_target_site_id(Some(7.into())).unwrap();
        source.set_current_tenant_id(Some(40.into())).unwrap();
        source.set_current_user_id(Some(7.into())).unwrap();
        source.set_current_root_id(Some(9.into())).unwrap();
        source.set_request_id(Some("req-42".into()));
        source.set_locale(Some("nl".parse().unwrap()));
        source.set_view_context(Some(Arc::new(1_u8)));
        let started = source.started();

        let wire = source.to_record().to_json().unwrap();
        let (target, clock) = frozen(AttributeRegistry::extended());
        clock.advance(Duration::hours(2));
        target.from_record(&StateRecord::from_json(&wire).unwrap()).unwrap();

        assert_eq!(target.current_site(), Some(entity(5)));
        assert_eq!(target.target_site(), Some(entity(7)));
        assert_eq!(target.either_site_id().unwrap(), Some(IdentityId::Number(7)));
        assert_eq!(target.current_tenant_id(), Some(IdentityId::Number(40)));
        assert_eq!(target.current_user_id(), Some(IdentityId::Number(7)));
        assert_eq!(target.request_id().as_deref(), Some("req-42"));
        assert_eq!(target.locale().unwrap().as_str(), "nl");
        assert_eq!(target.started(), started);
        // local-only state does not travel
        assert!(target.current_root().is_none());
        assert!(target.view_context().is_none());
    }

    #[test]
    fn hydration_accepts_ids_for_local_slots() {
        let state = state(AttributeRegistry::standard());
        let record = StateRecord::from_value(json!({ "current_admin_id": 8 })).unwrap();
        state.from_record(&record).unwrap();
        assert_eq!(state.current_admin_id(), Some(IdentityId::Number(8)));
    }

    #[test]
    fn hydration_misses_empty_slots() {
        let state = state(AttributeRegistry::standard());
        state.set_current_user_id(Some(7.into())).unwrap();
        let record = StateRecord::from_value(json!({ "current_user_id": 999 })).unwrap();
        state.from_record(&record).unwrap();
        assert!(state.current_user().is_none());
    }

    #[test]
    fn null_ids_and_unknown_keys_are_skipped() {
        let state = state(AttributeRegistry::standard());
        state.set_current_user_id(Some(7.into())).unwrap();
        let record = StateRecord::from_value(json!({
            "current_user_id": null,
            "target_site_id": 3,
        }))
        .unwrap();
        state.from_record(&record).unwrap();
        assert_eq!(state.current_user_id(), Some(IdentityId::Number(7)));
        assert!(state.get(Slots::TARGET_SITE).is_none());
    }

    #[test]
    fn job_metadata_next_to_the_record_is_ignored() {
        let state = state(AttributeRegistry::standard());
        let record = StateRecord::from_json(
            r#"{"request_id":"r","current_site_id":123,"retry":true,"meta":{"queue":"default"}}"#,
        )
        .unwrap();
        state.from_record(&record).unwrap();
        assert_eq!(state.current_site_id(), Some(IdentityId::Number(123)));
        assert_eq!(state.request_id().as_deref(), Some("r"));
    }

    #[test]
    fn missing_started_restamps_with_now() {
        let (state, clock) = frozen(AttributeRegistry::standard());
        state.started();
        clock.advance(Duration::seconds(3));
        state.from_record(&StateRecord::default()).unwrap();
        assert_eq!(state.started(), frozen_time() + Duration::seconds(3));

        let blank = StateRecord {
            started_string: Some("  ".into()),
            ..StateRecord::default()
        };
        clock.advance(Duration::seconds(3));
        state.from_record(&blank).unwrap();
        assert_eq!(state.started(), frozen_time() + Duration::seconds(6));
    }

    #[test]
    fn absent_metadata_keeps_existing_values() {
        let state = state(AttributeRegistry::standard());
        state.set_request_id(Some("req-1".into()));
        state.set_locale(Some("de".parse().unwrap()));
        state.from_record(&StateRecord::default()).unwrap();
        assert_eq!(state.request_id().as_deref(), Some("req-1"));
        assert_eq!(state.locale().unwrap().as_str(), "de");
    }

    #[test]
    fn malformed_timestamp_fails_without_partial_writes() {
        let state = state(AttributeRegistry::standard());
        let record = StateRecord::from_value(json!({
            "started_string": "yesterday-ish",
            "current_site_id": 1,
        }))
        .unwrap();
        assert_eq!(
            state.from_record(&record).unwrap_err(),
            StateError::InvalidTimestamp("yesterday-ish".into())
        );
        assert!(state.current_site().is_none());
    }

    #[test]
    fn malformed_locale_fails_without_partial_writes() {
        let state = state(AttributeRegistry::standard());
        let record = StateRecord::from_value(json!({
            "locale": "not a locale",
            "current_site_id": 1,
            "request_id": "req-9",
        }))
        .unwrap();
        assert!(matches!(
            state.from_record(&record),
            Err(StateError::InvalidLocale(_))
        ));
        assert!(state.current_site().is_none());
        assert!(state.request_id().is_none());
    }

    #[test]
    fn started_string_formats() {
        assert_eq!(format_started(frozen_time()), "2026-10-19T08:15:02.123456Z");
        assert_eq!(
            parse_started("2026-10-19T10:15:02.123456+02:00").unwrap(),
            frozen_time()
        );
        assert_eq!(
            parse_started("2026-10-19 08:15:02 UTC").unwrap(),
            frozen_time() - Duration::microseconds(123_456)
        );
        assert!(parse_started("19/10/2026").is_err());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handoff
// ─────────────────────────────────────────────────────────────────────────────

mod handoff {
    use super::*;
    use reqstate_core::handoff::{capture, run_with_record, spawn_with_record};

    fn task_state() -> RequestState<TaskStore> {
        RequestState::new(
            Arc::new(AttributeRegistry::extended()),
            Arc::new(repositories()),
            TaskStore,
        )
    }

    #[tokio::test]
    async fn job_sees_the_captured_identities() {
        let state = task_state();
        let record = TaskStore::scope(async {
            state.set_current_site_id(Some(5.into())).unwrap();
            state.set_target_site_id(Some(7.into())).unwrap();
            state.set_current_user_id(Some(7.into())).unwrap();
            state.set_request_id(Some("req-job".into()));
            capture(&state)
        })
        .await;

        let seen = run_with_record(state.clone(), record, |job| async move {
            (
                job.either_site_id().unwrap(),
                job.current_user_id(),
                job.request_id(),
            )
        })
        .await
        .unwrap();

        assert_eq!(
            seen,
            (
                Some(IdentityId::Number(7)),
                Some(IdentityId::Number(7)),
                Some("req-job".to_string())
            )
        );
    }

    #[tokio::test]
    async fn job_record_does_not_leak_into_caller() {
        let state = task_state();
        let record = StateRecord::from_value(json!({ "current_site_id": 1 })).unwrap();

        TaskStore::scope(async {
            state.set_current_site_id(Some(2.into())).unwrap();
            let inner = run_with_record(state.clone(), record, |job| async move {
                job.set_current_user_id(Some(7.into())).unwrap();
                job.current_site_id()
            })
            .await
            .unwrap();
            assert_eq!(inner, Some(IdentityId::Number(1)));

            assert_eq!(state.current_site_id(), Some(IdentityId::Number(2)));
            assert!(state.current_user().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn bad_record_fails_before_the_job_runs() {
        let record = StateRecord::from_value(json!({ "started_string": "soon" })).unwrap();
        let err = run_with_record(task_state(), record, |_| async { 1_u8 })
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTimestamp(_)));
    }

    #[tokio::test]
    async fn spawned_job_runs_on_its_own_task() {
        let record = StateRecord::from_value(json!({
            "current_tenant_id": 41,
            "locale": "fr",
        }))
        .unwrap();

        let handle = spawn_with_record(task_state(), record, |job| async move {
            tokio::task::yield_now().await;
            (job.current_tenant_id(), job.locale().map(|l| l.to_string()))
        });
        let (tenant, locale) = handle.await.unwrap().unwrap();
        assert_eq!(tenant, Some(IdentityId::Number(41)));
        assert_eq!(locale.as_deref(), Some("fr"));
    }
}

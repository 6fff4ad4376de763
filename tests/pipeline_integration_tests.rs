#[path = "test_utils/mod.rs"]
mod test_utils;

use orgpulse::pipeline::Stage;
use serde_json::json;
use std::collections::HashSet;
use test_utils::{
    build_pipeline, mount_members_page, mount_org, mount_ready_stats, mount_repos, repo_json,
    test_pipeline_config,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn acme_run_keeps_only_recently_updated_repositories() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    mount_members_page(
        &server,
        "acme",
        1,
        json!([{ "login": "alice" }, { "login": "bob" }]),
    )
    .await;
    mount_repos(
        &server,
        "alice",
        json!([
            repo_json("alice", "fresh", 3),
            repo_json("alice", "stale", 30)
        ]),
    )
    .await;
    mount_repos(&server, "bob", json!([])).await;
    mount_ready_stats(&server, "alice", "fresh").await;
    Mock::given(method("GET"))
        .and(path("/repos/alice/stale/stats/code_frequency"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let org = pipeline.execute("acme").await?;

    assert_eq!(org.login, "acme");
    assert_eq!(org.profile.display_name.as_deref(), Some("acme Inc"));
    assert_eq!(org.recently_updated_repo_count, Some(1));

    let alice = org.find_member("alice").expect("alice is a member");
    assert_eq!(alice.repos.len(), 1);
    assert_eq!(alice.repos[0].name, "fresh");
    assert!(alice.repos[0].stats.is_complete());
    assert_eq!(
        alice.repos[0].stats.code_frequency,
        Some(json!([[1717200000, 120, -40]]))
    );
    assert_eq!(alice.repos[0].stats.punch_card, Some(json!([[0, 9, 3]])));

    let bob = org.find_member("bob").expect("bob is a member");
    assert!(bob.repos.is_empty());
    assert_eq!(org.failure_count(), 0);

    let stored = pipeline.store().find_by_login("acme").await?;
    assert_eq!(stored.as_ref(), Some(&org));
    assert_eq!(pipeline.store().count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn statistics_pending_twice_then_ready_are_stored() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    mount_members_page(&server, "acme", 1, json!([{ "login": "alice" }])).await;
    mount_repos(&server, "alice", json!([repo_json("alice", "widgets", 1)])).await;

    Mock::given(method("GET"))
        .and(path("/repos/alice/widgets/stats/code_frequency"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/alice/widgets/stats/code_frequency"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[1717200000, 5, -1]])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/alice/widgets/stats/punch_card"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[1, 14, 2]])))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let org = pipeline.execute("acme").await?;

    let repo = &org.members[0].repos[0];
    assert_eq!(repo.stats.code_frequency, Some(json!([[1717200000, 5, -1]])));
    assert_eq!(repo.stats.punch_card, Some(json!([[1, 14, 2]])));
    Ok(())
}

#[tokio::test]
async fn statistics_that_never_become_ready_fail_the_run() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    mount_members_page(&server, "acme", 1, json!([{ "login": "alice" }])).await;
    mount_repos(&server, "alice", json!([repo_json("alice", "widgets", 1)])).await;

    let config = orgpulse::config::PipelineConfig {
        stats_max_polls: 3,
        ..test_pipeline_config()
    };
    Mock::given(method("GET"))
        .and(path("/repos/alice/widgets/stats/code_frequency"))
        .respond_with(ResponseTemplate::new(202))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/alice/widgets/stats/punch_card"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[1, 14, 2]])))
        .mount(&server)
        .await;

    let pipeline = build_pipeline(&server, config).await?;
    let err = pipeline.execute("acme").await.unwrap_err();

    assert_eq!(err.stage(), Stage::CollectStats);
    assert_eq!(err.error_code(), "PENDING_STATS");
    assert!(err.to_string().contains("alice/widgets (code_frequency)"));
    assert!(err.to_string().contains("still pending after 3 polls"));

    // The statistics write never happened.
    let stored = pipeline.store().find_by_login("acme").await?.expect("stored");
    assert!(stored.members[0].repos[0].stats.code_frequency.is_none());
    assert!(stored.members[0].repos[0].stats.punch_card.is_none());
    Ok(())
}

#[tokio::test]
async fn statistics_transport_failure_fails_the_run_without_fail_fast() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    mount_members_page(&server, "acme", 1, json!([{ "login": "alice" }])).await;
    mount_repos(&server, "alice", json!([repo_json("alice", "widgets", 1)])).await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex(r"^/repos/alice/widgets/stats/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("stats backend down"))
        .mount(&server)
        .await;

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let err = pipeline.execute("acme").await.unwrap_err();

    assert_eq!(err.stage(), Stage::CollectStats);
    assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    assert!(err.to_string().contains("alice/widgets"));
    Ok(())
}

#[tokio::test]
async fn statistics_join_waits_for_every_repository_across_members() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    mount_members_page(
        &server,
        "acme",
        1,
        json!([{ "login": "alice" }, { "login": "bob" }]),
    )
    .await;
    mount_repos(
        &server,
        "alice",
        json!([repo_json("alice", "one", 1), repo_json("alice", "two", 2)]),
    )
    .await;
    mount_repos(
        &server,
        "bob",
        json!([repo_json("bob", "three", 3), repo_json("bob", "four", 4)]),
    )
    .await;

    // Uneven delays make branches finish out of spawn order.
    let repos = [
        ("alice", "one", 150u64),
        ("alice", "two", 0),
        ("bob", "three", 60),
        ("bob", "four", 10),
    ];
    for (owner, repo, delay_ms) in repos {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}/{}/stats/code_frequency", owner, repo)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([[1717200000, delay_ms, -1]]))
                    .set_delay(std::time::Duration::from_millis(delay_ms)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}/{}/stats/punch_card", owner, repo)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([[0, 12, delay_ms]]))
                    .set_delay(std::time::Duration::from_millis(150 - delay_ms)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let org = pipeline.execute("acme").await?;

    assert_eq!(org.recently_updated_repo_count, Some(4));
    assert_eq!(org.repository_count(), 4);
    for (owner, repo, delay_ms) in repos {
        let member = org.find_member(owner).expect("member present");
        let stored = member
            .repos
            .iter()
            .find(|r| r.name == repo)
            .expect("repository present");
        assert!(stored.stats.is_complete(), "{}/{} incomplete", owner, repo);
        assert_eq!(
            stored.stats.code_frequency,
            Some(json!([[1717200000, delay_ms, -1]]))
        );
        assert_eq!(stored.stats.punch_card, Some(json!([[0, 12, delay_ms]])));
    }

    let persisted = pipeline.store().find_by_login("acme").await?;
    assert_eq!(persisted.as_ref(), Some(&org));
    Ok(())
}

#[tokio::test]
async fn paging_stops_on_short_page_and_keeps_member_order() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "bigco").await;
    mount_members_page(&server, "bigco", 1, test_utils::member_logins("m", 0..100)).await;
    mount_members_page(&server, "bigco", 2, test_utils::member_logins("m", 100..150)).await;
    Mock::given(method("GET"))
        .and(path("/orgs/bigco/members"))
        .and(wiremock::matchers::query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex(r"^/users/[^/]+/repos$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(150)
        .mount(&server)
        .await;

    let config = orgpulse::config::PipelineConfig {
        max_member_pages: Some(2),
        ..test_pipeline_config()
    };
    let pipeline = build_pipeline(&server, config).await?;
    let org = pipeline.execute("bigco").await?;

    assert_eq!(org.members.len(), 150);
    let unique: HashSet<_> = org.members.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(unique.len(), 150);
    assert_eq!(org.members[0].username, "m000");
    assert_eq!(org.members[99].username, "m099");
    assert_eq!(org.members[100].username, "m100");
    assert_eq!(org.members[149].username, "m149");
    assert_eq!(org.recently_updated_repo_count, Some(0));
    Ok(())
}

#[tokio::test]
async fn page_ceiling_truncates_and_duplicates_are_dropped() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    mount_members_page(
        &server,
        "acme",
        1,
        json!([{ "login": "alice" }, { "login": "bob" }]),
    )
    .await;
    mount_members_page(
        &server,
        "acme",
        2,
        json!([{ "login": "bob" }, { "login": "carol" }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/members"))
        .and(wiremock::matchers::query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "login": "dave" }])))
        .expect(0)
        .mount(&server)
        .await;
    for user in ["alice", "bob", "carol"] {
        mount_repos(&server, user, json!([])).await;
    }

    let config = orgpulse::config::PipelineConfig {
        members_per_page: 2,
        max_member_pages: Some(2),
        ..test_pipeline_config()
    };
    let pipeline = build_pipeline(&server, config).await?;
    let org = pipeline.execute("acme").await?;

    let names: Vec<_> = org.members.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob", "carol"]);
    Ok(())
}

#[tokio::test]
async fn failed_member_listing_is_recorded_and_run_completes() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    mount_members_page(
        &server,
        "acme",
        1,
        json!([{ "login": "alice" }, { "login": "bob" }]),
    )
    .await;
    mount_repos(&server, "alice", json!([repo_json("alice", "fresh", 2)])).await;
    Mock::given(method("GET"))
        .and(path("/users/bob/repos"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;
    mount_ready_stats(&server, "alice", "fresh").await;

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let org = pipeline.execute("acme").await?;

    assert_eq!(org.recently_updated_repo_count, Some(1));
    let bob = org.find_member("bob").expect("bob is kept");
    assert!(bob.repos.is_empty());
    let error = bob.error.as_deref().expect("listing failure recorded");
    assert!(error.starts_with("enumerate_repos:"));
    assert!(error.contains("bob"));

    let alice = org.find_member("alice").expect("alice is a member");
    assert!(alice.repos[0].stats.is_complete());
    Ok(())
}

#[tokio::test]
async fn fail_fast_aborts_on_first_member_failure() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    mount_members_page(&server, "acme", 1, json!([{ "login": "bob" }])).await;
    Mock::given(method("GET"))
        .and(path("/users/bob/repos"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = orgpulse::config::PipelineConfig {
        fail_fast: true,
        ..test_pipeline_config()
    };
    let pipeline = build_pipeline(&server, config).await?;
    let err = pipeline.execute("acme").await.unwrap_err();

    assert_eq!(err.stage(), Stage::EnumerateRepos);
    assert_eq!(err.error_code(), "TRANSPORT_ERROR");

    // Members were persisted before the failing stage began.
    let stored = pipeline.store().find_by_login("acme").await?.expect("stored");
    assert_eq!(stored.members.len(), 1);
    assert_eq!(stored.recently_updated_repo_count, None);
    Ok(())
}

#[tokio::test]
async fn unknown_organization_aborts_at_resolve() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let err = pipeline.execute("ghost").await.unwrap_err();

    assert_eq!(err.stage(), Stage::Resolve);
    assert_eq!(err.error_code(), "NOT_FOUND");
    assert_eq!(pipeline.store().count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn member_page_failure_aborts_the_run() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/members"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "60")
                .set_body_json(json!({ "message": "slow down" })),
        )
        .mount(&server)
        .await;

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let err = pipeline.execute("acme").await.unwrap_err();

    assert_eq!(err.stage(), Stage::EnumerateMembers);
    assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    assert!(err.to_string().contains("acme members page 1"));
    Ok(())
}

#[tokio::test]
async fn pipeline_deadline_bounds_the_whole_run() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(test_utils::org_json("acme"))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = orgpulse::config::PipelineConfig {
        pipeline_deadline_seconds: 1,
        request_timeout_ms: 10_000,
        ..test_pipeline_config()
    };
    let pipeline = build_pipeline(&server, config).await?;
    let err = pipeline.execute("acme").await.unwrap_err();

    assert_eq!(err.stage(), Stage::Resolve);
    assert_eq!(err.error_code(), "TIMEOUT");
    Ok(())
}

#[tokio::test]
async fn organization_without_members_finishes_with_zero_repositories() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "empty").await;
    mount_members_page(&server, "empty", 1, json!([])).await;

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let org = pipeline.run("empty").await?;

    assert!(org.members.is_empty());
    assert_eq!(org.recently_updated_repo_count, Some(0));
    Ok(())
}

#[tokio::test]
async fn rerun_replaces_members_and_keeps_one_row() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "login": "alice" }])))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/alice/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let pipeline = build_pipeline(&server, test_pipeline_config()).await?;
    let first = pipeline.execute("acme").await?;
    let second = pipeline.execute("acme").await?;

    assert_eq!(first, second);
    assert_eq!(second.members.len(), 1);
    assert_eq!(pipeline.store().count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn aborted_rerun_does_not_keep_the_previous_repository_count() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_org(&server, "acme").await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "login": "alice" }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/alice/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([repo_json("alice", "fresh", 1)])))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/alice/repos"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_ready_stats(&server, "alice", "fresh").await;

    let db = test_utils::setup_test_db().await?;
    let first = test_utils::build_pipeline_on(&server, db.clone(), test_pipeline_config())?;
    let org = first.execute("acme").await?;
    assert_eq!(org.recently_updated_repo_count, Some(1));

    let config = orgpulse::config::PipelineConfig {
        fail_fast: true,
        ..test_pipeline_config()
    };
    let second = test_utils::build_pipeline_on(&server, db, config)?;
    let err = second.execute("acme").await.unwrap_err();
    assert_eq!(err.stage(), Stage::EnumerateRepos);

    let stored = second.store().find_by_login("acme").await?.expect("stored");
    assert_eq!(stored.repository_count(), 0);
    assert_eq!(stored.recently_updated_repo_count, None);
    Ok(())
}

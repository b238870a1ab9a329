use std::collections::HashMap;

use chrono::Utc;
use indoc::indoc;
use mr_conform::codeowners::{ApprovalSummary, Codeowners};
use mr_conform::gitlab::{ApprovalInfo, ApprovalStatus, Approvals, Member};
use pretty_assertions::assert_eq;

fn member(username: &str, access_level: u32) -> Member {
    Member {
        username: username.to_string(),
        email: Some(format!("{username}@example.com")),
        access_level,
    }
}

fn approvals(usernames: &[&str]) -> Approvals {
    let mut per_user = HashMap::new();
    for (index, username) in usernames.iter().enumerate() {
        let user_id = index as u64 + 1;
        per_user.insert(
            user_id,
            ApprovalInfo {
                user_id,
                username: username.to_string(),
                status: ApprovalStatus::Approved,
                updated_at: Utc::now(),
            },
        );
    }
    Approvals {
        count: usernames.len() as u32,
        per_user,
    }
}

fn paths(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|path| path.to_string()).collect()
}

#[test]
fn exclusion_removes_ownership_for_matched_files() {
    let members = vec![member("a", 30)];
    let codeowners = Codeowners::parse("*.go @a\n!vendor/*.go\n", &members);

    let vendored = codeowners.owners_for_file("vendor/x.go");
    assert_eq!(vendored.len(), 1);
    assert!(vendored[0].owners.is_empty());

    let owned = codeowners.owners_for_file("src/x.go");
    assert_eq!(owned[0].owners.len(), 1);
    assert_eq!(owned[0].owners[0].name, "a");
}

#[test]
fn section_default_owners_carry_the_section_approval_count() {
    let members = vec![member("b1", 40), member("b2", 30)];
    let codeowners = Codeowners::parse("[Backend][2] @b1 @b2\napi/*.go\n", &members);

    let groups = codeowners.pattern_groups(&paths(&["api/s.go"]));
    assert_eq!(groups.len(), 1);
    let backend = &groups[0];
    assert_eq!(backend.section_name, "Backend");
    assert_eq!(backend.required_approvals, 2);
    assert!(backend.used_default_owners);
    let owner_names: Vec<_> = backend.owners.iter().map(|owner| owner.name.as_str()).collect();
    assert_eq!(owner_names, vec!["b1", "b2"]);
}

#[test]
fn unknown_role_auto_approves_the_pattern() {
    let members = vec![member("a", 30)];
    let codeowners = Codeowners::parse("src/** @@nosuchrole\n", &members);

    let ownership = codeowners.owners_for_file("src/a.go");
    assert_eq!(ownership.len(), 1);
    assert!(ownership[0].is_auto_approved);
    assert!(ownership[0].owners.is_empty());
}

#[test]
fn optional_sections_are_satisfied_without_any_approvals() {
    let members = vec![member("w", 30)];
    let codeowners = Codeowners::parse("^[Docs]\ndocs/** @w\n", &members);

    let groups = codeowners.pattern_groups(&paths(&["docs/guide.md"]));
    assert!(groups[0].is_optional);

    let summary = ApprovalSummary::build(&groups, &approvals(&[]), &members);
    assert!(summary.all_approved);
    assert!(summary.patterns[0].is_fully_approved);
}

#[test]
fn at_most_one_active_pattern_per_file_and_section() {
    let members = vec![member("a", 30), member("b", 30), member("w", 30)];
    let codeowners = Codeowners::parse(
        indoc! {"
            *.go @a
            src/*.go @b
            !src/generated/*.go
            [Docs]
            **/*.md @w
            docs/*.md @a
        "},
        &members,
    );

    for path in [
        "src/main.go",
        "src/generated/stub.go",
        "lib/util.go",
        "docs/intro.md",
        "guide/deep/notes.md",
    ] {
        for ownership in codeowners.owners_for_file(path) {
            let active = ownership
                .matching_patterns
                .iter()
                .filter(|pattern| pattern.is_active)
                .count();
            assert!(active <= 1, "path {path}, section {}", ownership.name);
            for pattern in &ownership.matching_patterns {
                assert!(
                    pattern.is_active || pattern.overridden_by.is_some(),
                    "inactive pattern without override for {path}"
                );
            }
        }
    }
}

#[test]
fn splitting_a_section_across_headers_is_equivalent() {
    let members = vec![member("b1", 40), member("a", 30)];
    let single = Codeowners::parse(
        indoc! {"
            [Backend][2] @b1
            api/*.go
            db/*.go @a
        "},
        &members,
    );
    let split = Codeowners::parse(
        indoc! {"
            [Backend][2] @b1
            api/*.go
            [BACKEND]
            db/*.go @a
        "},
        &members,
    );

    let files = paths(&["api/s.go", "db/m.go", "web/app.js"]);
    let single_groups = single.pattern_groups(&files);
    let split_groups = split.pattern_groups(&files);

    assert_eq!(single_groups.len(), split_groups.len());
    for (a, b) in single_groups.iter().zip(split_groups.iter()) {
        assert_eq!(a.pattern, b.pattern);
        assert_eq!(a.section_name, b.section_name);
        assert_eq!(a.files, b.files);
        assert_eq!(a.required_approvals, b.required_approvals);
        assert_eq!(a.owners, b.owners);
    }
}

#[test]
fn raising_access_level_never_shrinks_the_accessible_roles() {
    let codeowners_text = "*.rs @@developers @@maintainers @@owners\n";

    let mut valid_owners_at_level = Vec::new();
    for level in [30, 40, 50] {
        let members = vec![member("casey", level)];
        let codeowners = Codeowners::parse(codeowners_text, &members);
        let ownership = codeowners.owners_for_file("src/lib.rs");
        valid_owners_at_level.push(ownership[0].owners.len());
    }

    assert_eq!(valid_owners_at_level, vec![1, 2, 3]);
}

#[test]
fn full_summary_flow_for_a_mixed_file() {
    let members = vec![member("alice", 40), member("bob", 30)];
    let codeowners = Codeowners::parse(
        indoc! {"
            # default owners
            *.rs @alice

            [Security][1] @bob
            auth/**
        "},
        &members,
    );

    let files = paths(&["auth/token.rs", "src/main.rs"]);
    let groups = codeowners.pattern_groups(&files);
    assert_eq!(groups.len(), 2);

    let unapproved = ApprovalSummary::build(&groups, &approvals(&[]), &members);
    assert!(!unapproved.all_approved);
    let (table, suggestion) = unapproved.render();
    assert!(table.contains("``*.rs``"));
    assert!(table.contains("``auth/**``"));
    assert!(suggestion.contains("Wait for required approvals before merging"));

    let approved = ApprovalSummary::build(&groups, &approvals(&["alice", "bob"]), &members);
    assert!(approved.all_approved);
    let (table, suggestion) = approved.render();
    assert!(table.contains("[x]"));
    assert!(suggestion.is_empty());
}

#[test]
fn escaped_spaces_survive_parse_and_matching() {
    let members = vec![member("w", 30)];
    let codeowners = Codeowners::parse("docs/release\\ notes.md @w\n", &members);

    let ownership = codeowners.owners_for_file("docs/release notes.md");
    assert_eq!(ownership.len(), 1);
    assert_eq!(ownership[0].owners[0].name, "w");
}

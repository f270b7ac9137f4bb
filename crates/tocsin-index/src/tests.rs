use crate::TriggerIndex;
use tocsin_common::types::{Trigger, TriggerType};

fn make_trigger(id: &str, name: &str, desc: &str, tags: &[&str]) -> Trigger {
    Trigger {
        id: id.to_string(),
        name: name.to_string(),
        desc: if desc.is_empty() {
            None
        } else {
            Some(desc.to_string())
        },
        targets: vec!["m1".into()],
        warn_value: Some(10.0),
        error_value: Some(20.0),
        trigger_type: TriggerType::Rising,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ttl_state: None,
        ttl: 0,
        schedule: None,
        expression: None,
        python_expression: None,
        patterns: vec!["m1".into()],
        mute_new_metrics: false,
    }
}

fn make_index() -> TriggerIndex {
    let index = TriggerIndex::new();
    index.upsert(
        &make_trigger("t_nodata", "disk free space", "no data lately", &["disk"]),
        1000,
    );
    index.upsert(
        &make_trigger("t_error", "disk write errors", "", &["disk", "prod"]),
        100,
    );
    index.upsert(
        &make_trigger("t_ok", "disk io wait", "all quiet", &["disk"]),
        0,
    );
    index
}

#[test]
fn results_rank_by_score_descending() {
    let index = make_index();
    let (results, total) = index.search(&[], "disk", false, 0, 10);
    assert_eq!(total, 3);
    let ids: Vec<&str> = results.iter().map(|r| r.trigger_id.as_str()).collect();
    assert_eq!(ids, vec!["t_nodata", "t_error", "t_ok"]);
}

#[test]
fn equal_scores_tie_break_by_name() {
    let index = TriggerIndex::new();
    index.upsert(&make_trigger("t_b", "Bravo disk", "", &[]), 100);
    index.upsert(&make_trigger("t_a", "alpha disk", "", &[]), 100);

    let (results, _) = index.search(&[], "", false, 0, 10);
    let ids: Vec<&str> = results.iter().map(|r| r.trigger_id.as_str()).collect();
    assert_eq!(ids, vec!["t_a", "t_b"], "case-insensitive name ascending");
}

#[test]
fn equal_scores_rank_lower_relevance_first() {
    let index = TriggerIndex::new();
    index.upsert(&make_trigger("t_sparse", "disk alpha", "", &[]), 100);
    index.upsert(
        &make_trigger("t_dense", "disk disk disk beta", "disk", &[]),
        100,
    );

    let (results, _) = index.search(&[], "disk", false, 0, 10);
    let ids: Vec<&str> = results.iter().map(|r| r.trigger_id.as_str()).collect();
    assert_eq!(ids, vec!["t_sparse", "t_dense"]);
}

#[test]
fn only_errors_requires_positive_score() {
    let index = make_index();
    let (results, total) = index.search(&[], "", true, 0, 10);
    assert_eq!(total, 2);
    assert!(results.iter().all(|r| r.trigger_id != "t_ok"));
}

#[test]
fn filter_tags_must_all_be_present() {
    let index = make_index();
    let (results, total) = index.search(&["disk".into(), "prod".into()], "", false, 0, 10);
    assert_eq!(total, 1);
    assert_eq!(results[0].trigger_id, "t_error");

    let (_, none) = index.search(&["disk".into(), "staging".into()], "", false, 0, 10);
    assert_eq!(none, 0);
}

#[test]
fn every_query_term_must_match() {
    let index = make_index();
    let (results, total) = index.search(&[], "disk errors", false, 0, 10);
    assert_eq!(total, 1);
    assert_eq!(results[0].trigger_id, "t_error");

    let (_, none) = index.search(&[], "disk unknown", false, 0, 10);
    assert_eq!(none, 0);
}

#[test]
fn query_terms_split_on_separator_characters() {
    let index = TriggerIndex::new();
    index.upsert(&make_trigger("t1", "disk usage high", "", &[]), 0);

    let (_, total) = index.search(&[], "disk-usage:high", false, 0, 10);
    assert_eq!(total, 1);

    // The same class tokenizes indexed fields too.
    index.upsert(&make_trigger("t2", "memory.free_percent", "", &[]), 0);
    let (results, total) = index.search(&[], "free", false, 0, 10);
    assert_eq!(total, 1);
    assert_eq!(results[0].trigger_id, "t2");
}

#[test]
fn negative_size_returns_everything_from_page_zero() {
    let index = make_index();
    let (results, total) = index.search(&[], "", false, 7, -1);
    assert_eq!(total, 3);
    assert_eq!(results.len(), 3);
}

#[test]
fn pagination_slices_the_ranked_list() {
    let index = make_index();
    let (page0, total) = index.search(&[], "", false, 0, 2);
    assert_eq!(total, 3);
    assert_eq!(page0.len(), 2);
    assert_eq!(page0[0].trigger_id, "t_nodata");

    let (page1, _) = index.search(&[], "", false, 1, 2);
    assert_eq!(page1.len(), 1);
    assert_eq!(page1[0].trigger_id, "t_ok");
}

#[test]
fn highlights_wrap_matched_words() {
    let index = make_index();
    let (results, _) = index.search(&[], "errors", false, 0, 10);
    assert_eq!(results[0].trigger_id, "t_error");
    assert_eq!(results[0].highlights.name, "disk write <mark>errors</mark>");
    assert_eq!(results[0].highlights.desc, "");
}

#[test]
fn empty_query_produces_no_highlights() {
    let index = make_index();
    let (results, _) = index.search(&[], "", false, 0, 10);
    assert!(results.iter().all(|r| r.highlights.name.is_empty()));
}

#[test]
fn update_score_changes_ranking() {
    let index = make_index();
    index.update_score("t_ok", 100_000);

    let (results, _) = index.search(&[], "", false, 0, 1);
    assert_eq!(results[0].trigger_id, "t_ok");

    // Unknown ids are ignored.
    index.update_score("missing", 5);
    assert_eq!(index.doc_count(), 3);
}

#[test]
fn delete_removes_document() {
    let index = make_index();
    index.delete("t_error");
    let (_, total) = index.search(&[], "", false, 0, 10);
    assert_eq!(total, 2);
}

#[test]
fn upsert_replaces_existing_document() {
    let index = make_index();
    index.upsert(
        &make_trigger("t_ok", "network latency", "", &["net"]),
        0,
    );
    assert_eq!(index.doc_count(), 3);

    let (_, disk_total) = index.search(&[], "disk", false, 0, 10);
    assert_eq!(disk_total, 2);
    let (results, _) = index.search(&[], "latency", false, 0, 10);
    assert_eq!(results[0].trigger_id, "t_ok");
}

#[test]
fn fill_bootstraps_a_batch() {
    let index = TriggerIndex::new();
    let triggers = vec![
        make_trigger("t1", "one", "", &[]),
        make_trigger("t2", "two", "", &[]),
    ];
    index.fill(triggers.iter().map(|t| (t, 0)));
    assert_eq!(index.doc_count(), 2);
}

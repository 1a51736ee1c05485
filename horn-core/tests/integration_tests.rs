use std::collections::HashMap;

use indoc::indoc;

use horn_core::{
    atom, call,
    engine::Horn,
    query::{Query, QueryOpts},
    sym, term, terms,
    terms::{Term, Value},
    trace::{EventKind, TraceStatus},
    value,
};

fn family() -> Horn {
    let horn = Horn::new();
    horn.load_str(indoc! {r#"
        parent(tom, mary). parent(tom, bob).
        parent(mary, ann). parent(mary, pat).
        parent(bob, jim). parent(bob, liz).
        ancestor(X, Y) :- parent(X, Y).
        ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).
    "#})
    .unwrap();
    horn
}

fn atoms(query: Query, name: &str) -> Vec<String> {
    query
        .map(|answer| match answer[name].value() {
            Value::Atom(a) => a.0.clone(),
            other => panic!("expected atom for {}, got {:?}", name, other),
        })
        .collect()
}

fn all_answers(horn: &Horn, src: &str) -> Vec<HashMap<String, Term>> {
    horn.query_str(src, QueryOpts::default())
        .unwrap()
        .collect()
}

#[test]
fn scenario_family_ancestor() {
    let horn = family();
    let query = horn
        .query_str("ancestor(tom, ?d)", QueryOpts::default())
        .unwrap();
    // Facts through the first rule come first, then the recursion.
    assert_eq!(
        atoms(query, "d"),
        vec!["mary", "bob", "ann", "pat", "jim", "liz"]
    );
}

#[test]
fn scenario_grandparent() {
    let horn = family();
    horn.load_str("grandparent(X, Z) :- parent(X, Y), parent(Y, Z).")
        .unwrap();
    let query = horn
        .query_str("grandparent(tom, ?g)", QueryOpts::default())
        .unwrap();
    let found = atoms(query, "g");
    assert_eq!(found.len(), 4);
    assert_eq!(found, vec!["ann", "pat", "jim", "liz"]);
}

#[test]
fn scenario_arithmetic_via_is() {
    let horn = Horn::new();
    let answers = all_answers(&horn, "is(?s, +(2, 3))");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["s"], term!(5));
}

#[test]
fn arithmetic_comparison_operators_run_from_text() {
    let horn = Horn::new();
    assert_eq!(all_answers(&horn, "=:=(2, 2.0)").len(), 1);
    assert!(all_answers(&horn, "=:=(2, 3)").is_empty());
    assert_eq!(all_answers(&horn, "=\\=(2, 3)").len(), 1);
}

#[test]
fn scenario_occurs_check_protection() {
    let horn = Horn::new();
    // Binding ?x to [?x] must fail without looping.
    let answers = all_answers(&horn, "=(?x, [?x])");
    assert!(answers.is_empty());
}

#[test]
fn scenario_concurrent_mutation_snapshot() {
    let horn = family();
    let mut streaming = horn
        .query_str("parent(?x, ?y)", QueryOpts::default())
        .unwrap();

    assert!(streaming.next().is_some());
    assert!(streaming.next().is_some());

    horn.assert_fact(sym!("parent"), terms![atom!("new1"), atom!("new2")])
        .unwrap();

    // The in-progress iterator still yields exactly the original six.
    assert_eq!(streaming.count(), 4);

    let fresh = horn
        .query_str("parent(?x, ?y)", QueryOpts::default())
        .unwrap();
    assert_eq!(fresh.count(), 7);
}

#[test]
fn scenario_findall() {
    let horn = family();
    let answers = all_answers(&horn, "findall(?c, parent(tom, ?c), ?l)");
    assert_eq!(answers.len(), 1);
    assert_eq!(
        answers[0]["l"],
        term!(value!([atom!("mary"), atom!("bob")]))
    );
}

#[test]
fn property_idempotent_assertion() {
    let horn = Horn::new();
    horn.assert_fact(sym!("p"), terms![atom!("a")]).unwrap();
    horn.assert_fact(sym!("p"), terms![atom!("a")]).unwrap();

    let facts = horn.facts(Some(&sym!("p")));
    assert_eq!(facts[&sym!("p")].len(), 1);
    // Both asserts are visible in the history log.
    assert_eq!(horn.history(None).len(), 2);
}

#[test]
fn property_rule_order_preservation() {
    let horn = Horn::new();
    horn.load_str(indoc! {r#"
        pick(X) :- first(X).
        pick(X) :- second(X).
        pick(X) :- third(X).
        first(one). second(two). third(three).
    "#})
    .unwrap();
    let query = horn.query_str("pick(?x)", QueryOpts::default()).unwrap();
    assert_eq!(atoms(query, "x"), vec!["one", "two", "three"]);
}

#[test]
fn property_reification_stability() {
    use horn_core::formatting::ToText;

    // Variable identities differ between runs, so stability is judged
    // on the printed form.
    let render = |answers: &[HashMap<String, Term>]| -> Vec<Vec<(String, String)>> {
        answers
            .iter()
            .map(|answer| {
                let mut row: Vec<_> = answer
                    .iter()
                    .map(|(name, term)| (name.clone(), term.to_text()))
                    .collect();
                row.sort();
                row
            })
            .collect()
    };

    let horn = family();
    let first = all_answers(&horn, "parent(?x, ?y), =(?unused, ?z)");
    let second = all_answers(&horn, "parent(?x, ?y), =(?unused, ?z)");
    // Unbound variables reify to the same `_n` names every time.
    assert_eq!(render(&first), render(&second));
    assert_eq!(first[0]["unused"], first[0]["z"]);
}

#[test]
fn property_trace_coverage() {
    let horn = family();
    let query = horn
        .query_str(
            "ancestor(tom, ?d)",
            QueryOpts {
                trace: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(query.count(), 6);

    let log = horn.trace_log();
    let tree = horn.trace_tree();
    assert!(!tree.is_empty());

    for node in &tree {
        let calls = log
            .iter()
            .filter(|e| e.node_id == node.id && e.kind == EventKind::Call)
            .count();
        assert_eq!(calls, 1, "every attempted goal has exactly one CALL");

        let exits = log
            .iter()
            .filter(|e| e.node_id == node.id && e.kind == EventKind::Exit)
            .count();
        let fails = log
            .iter()
            .filter(|e| e.node_id == node.id && e.kind == EventKind::Fail)
            .count();
        match node.status {
            TraceStatus::Success => {
                assert_eq!(exits, 1);
                assert!(node.results >= 1);
            }
            TraceStatus::Fail => {
                assert_eq!(fails, 1);
                assert_eq!(node.results, 0);
            }
            TraceStatus::Pending => panic!("no node should stay pending after exhaustion"),
        }
    }

    // Parent links form a tree rooted at the top-level goal.
    for node in &tree {
        if let Some(parent) = node.parent {
            let parent_node = tree.iter().find(|n| n.id == parent).unwrap();
            assert_eq!(parent_node.depth + 1, node.depth);
        }
    }
}

#[test]
fn property_snapshot_isolation_with_rules() {
    let horn = family();
    let streaming = horn
        .query_str("ancestor(tom, ?d)", QueryOpts::default())
        .unwrap();
    horn.clear().unwrap();
    // The stream was created against the pre-clear snapshot.
    assert_eq!(streaming.count(), 6);
    assert_eq!(horn.stats().total_facts, 0);
}

#[test]
fn round_trip_export_import() {
    let horn = family();
    let payload = horn.export();

    let other = Horn::new();
    other.import(&payload).unwrap();

    assert_eq!(horn.facts(None), other.facts(None));
    let query = other
        .query_str("ancestor(tom, ?d)", QueryOpts::default())
        .unwrap();
    assert_eq!(query.count(), 6);

    // Export again; contents are identical apart from the timestamp.
    let again = other.export();
    assert_eq!(payload.facts, again.facts);
    assert_eq!(
        serde_json::to_value(&payload.rules).unwrap(),
        serde_json::to_value(&again.rules).unwrap()
    );
}

#[test]
fn round_trip_wire_terms() {
    let term = term!(call!(
        "f",
        [atom!("a"), 1, 2.5, "text", value!([1, atom!("b")])]
    ));
    let json = serde_json::to_string(&term).unwrap();
    let back: Term = serde_json::from_str(&json).unwrap();
    assert_eq!(term, back);
    // And the canonical text form parses back to the same value.
    assert_eq!(json, serde_json::to_string(&back).unwrap());
}

#[test]
fn boundary_unknown_predicate() {
    let horn = Horn::new();
    assert!(all_answers(&horn, "nothing(here)").is_empty());
}

#[test]
fn boundary_between_empty_range() {
    let horn = Horn::new();
    assert!(all_answers(&horn, "between(5, 3, ?x)").is_empty());
}

#[test]
fn boundary_length_zero_binds_empty_list() {
    let horn = Horn::new();
    let answers = all_answers(&horn, "length(?l, 0)");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["l"], term!(value!([])));
}

#[test]
fn boundary_findall_of_fail() {
    let horn = Horn::new();
    let answers = all_answers(&horn, "findall(?x, fail, ?xs)");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["xs"], term!(value!([])));
}

#[test]
fn cut_commits_enclosing_clause() {
    let horn = Horn::new();
    horn.load_str(indoc! {r#"
        color(red). color(green). color(blue).
        pick(X) :- color(X), !.
        pick(X) :- =(X, none).
    "#})
    .unwrap();
    // Without the cut this would yield red, green, blue and none.
    let query = horn.query_str("pick(?x)", QueryOpts::default()).unwrap();
    assert_eq!(atoms(query, "x"), vec!["red"]);
}

#[test]
fn negation_as_failure_in_rules() {
    let horn = Horn::new();
    horn.load_str(indoc! {r#"
        bird(tweety). bird(pingu).
        flies_not(pingu).
        can_fly(X) :- bird(X), not(flies_not(X)).
    "#})
    .unwrap();
    let query = horn.query_str("can_fly(?x)", QueryOpts::default()).unwrap();
    assert_eq!(atoms(query, "x"), vec!["tweety"]);
}

#[test]
fn disjunction_in_rule_bodies() {
    let horn = Horn::new();
    horn.load_str(indoc! {r#"
        cold(oslo). sunny(lima).
        nice(X) :- sunny(X) ; cold(X).
    "#})
    .unwrap();
    let query = horn.query_str("nice(?x)", QueryOpts::default()).unwrap();
    assert_eq!(atoms(query, "x"), vec!["lima", "oslo"]);
}

#[test]
fn open_list_tails_unify() {
    let horn = Horn::new();
    let answers = all_answers(&horn, "=([?h | ?t], [1, 2, 3])");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["h"], term!(1));
    assert_eq!(answers[0]["t"], term!(value!([2, 3])));
}

#[test]
fn rules_over_maps() {
    let horn = Horn::new();
    horn.load_str(indoc! {r#"
        profile({name: "ann", age: 7}).
        age_of(A) :- profile({name: ?_n, age: A}).
    "#})
    .unwrap();
    let answers = all_answers(&horn, "age_of(?a)");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["a"], term!(7));
}

#[test]
fn tabled_queries_hit_the_cache_until_invalidation() {
    let horn = family();
    horn.table(sym!("parent"));

    let _ = horn
        .query_str("parent(tom, ?x)", QueryOpts::default())
        .unwrap()
        .count();
    let after_first = horn.stats();

    let _ = horn
        .query_str("parent(tom, ?x)", QueryOpts::default())
        .unwrap()
        .count();
    let after_second = horn.stats();
    assert!(after_second.cache_hits > after_first.cache_hits);

    // Any mutation invalidates the table.
    horn.assert_fact(sym!("parent"), terms![atom!("a"), atom!("b")])
        .unwrap();
    let query = horn
        .query_str("parent(tom, ?x)", QueryOpts::default())
        .unwrap();
    assert_eq!(query.count(), 2);
}

#[test]
fn spy_and_trace_compose() {
    let horn = family();
    horn.spy(sym!("parent"));
    let query = horn
        .query_str(
            "parent(tom, ?x)",
            QueryOpts {
                trace: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(query.count(), 2);

    // Both instruments saw the same call.
    assert!(horn
        .trace_tree()
        .iter()
        .any(|n| n.predicate == sym!("parent")));
    assert_eq!(horn.spy_stats()[&sym!("parent")].calls, 1);
}

#[test]
fn query_variables_share_across_goals() {
    let horn = family();
    // ?x is the same variable in both goals.
    let answers = all_answers(&horn, "parent(tom, ?x), parent(?x, ?y)");
    assert_eq!(answers.len(), 4);
    for answer in &answers {
        let x = &answer["x"];
        let y = &answer["y"];
        assert_ne!(x, y);
        assert!(matches!(x.value(), Value::Atom(_)));
    }
}

#[test]
fn history_records_commit_order() {
    let horn = Horn::new();
    horn.assert_fact(sym!("p"), terms![1]).unwrap();
    horn.assert_fact(sym!("p"), terms![2]).unwrap();
    horn.retract_fact(&sym!("p"), &terms![1]).unwrap();
    // Retracting a nonexistent fact is a no-op and leaves no record.
    horn.retract_fact(&sym!("p"), &terms![9]).unwrap();

    let history = horn.history(None);
    assert_eq!(history.len(), 3);
    use horn_core::kb::ChangeKind;
    assert_eq!(history[0].kind, ChangeKind::Assert);
    assert_eq!(history[1].kind, ChangeKind::Assert);
    assert_eq!(history[2].kind, ChangeKind::Retract);
}

#[test]
fn trace_export_has_nodes_and_links() {
    let horn = family();
    let query = horn
        .query_str(
            "ancestor(tom, ?d)",
            QueryOpts {
                trace: true,
                limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(query.count(), 1);

    let export = horn.export_trace_tree();
    assert!(!export.nodes.is_empty());
    for link in &export.links {
        assert!(export.nodes.iter().any(|n| n.id == link.source));
        assert!(export.nodes.iter().any(|n| n.id == link.target));
    }
}

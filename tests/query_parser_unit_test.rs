use tabql::expr::{Counter, Expr, Side};
use tabql::query::{self, Action, DistinctMode, JoinMode, SelectItem};

#[test]
fn test_full_query_plan() {
    let plan = query::parse(
        "select top   100 *, a2, a3 inner  join /path/to/the/file.tsv on a1 == b3 \
         where a4 == \"hello\" and int(b3) == 100 order by int(a7) desc ",
    )
    .unwrap();

    assert_eq!(plan.action, Action::Select);
    assert_eq!(plan.top, Some(100));
    assert_eq!(plan.distinct, DistinctMode::None);
    assert_eq!(plan.select_items.len(), 3);
    assert!(matches!(plan.select_items[0], SelectItem::Star));
    assert_eq!(
        plan.select_items[1],
        SelectItem::Expr(Expr::Column(Side::A, 2))
    );

    let join = plan.join.unwrap();
    assert_eq!(join.mode, JoinMode::Inner);
    assert_eq!(join.locator, "/path/to/the/file.tsv");
    assert_eq!(join.left_col, 1);
    assert_eq!(join.right_col, 3);

    assert!(plan.where_expr.is_some());
    let order = plan.order_by.unwrap();
    assert!(order.reverse);
    assert_eq!(order.keys.len(), 1);
}

#[test]
fn test_join_key_sides_can_swap() {
    let plan = query::parse("select a1 join file.tsv on b20== a12").unwrap();
    let join = plan.join.unwrap();
    assert_eq!(join.locator, "file.tsv");
    assert_eq!(join.left_col, 12);
    assert_eq!(join.right_col, 20);
}

#[test]
fn test_invalid_join_shapes() {
    for query_text in [
        "select a1 join /path/to/the/file.tsv on a1==a12",
        "select a1 join Bon b1 == a12",
        "select a1 join file.tsv on a1 == b2 == b3",
        "select a1 join file.tsv on len(a1) == b2",
    ] {
        let err = query::parse(query_text).unwrap_err();
        assert!(
            err.to_string().contains("Invalid join syntax"),
            "query: {} error: {}",
            query_text,
            err
        );
    }
}

#[test]
fn test_where_assignment_is_rejected() {
    let err = query::parse("select NR where a3 = \"hioho\"").unwrap_err();
    assert!(err.to_string().contains(
        "Assignments \"=\" are not allowed in \"WHERE\" expressions. \
         For equality test use \"==\""
    ));

    // comparison operators are fine
    assert!(query::parse("select NR where a3 == \"x\" and a1 != \"y\" and a2 >= \"1\"").is_ok());
}

#[test]
fn test_except_list_parsing() {
    let plan = query::parse("select * except  a1,a2,a3, a4,a5, a6 ,   a7  ,a8").unwrap();
    assert_eq!(plan.except, Some(vec![0, 1, 2, 3, 4, 5, 6, 7]));
    assert_eq!(plan.select_items, vec![SelectItem::Star]);

    let plan = query::parse("select * except a1").unwrap();
    assert_eq!(plan.except, Some(vec![0]));

    assert!(query::parse("select * except a1, b2").is_err());
    assert!(query::parse("select * except a0").is_err());
}

#[test]
fn test_update_assignment_parsing() {
    let plan = query::parse(
        "update  a1 =  a2  + a3, a2=a4  if a3 == a2 else a8, a8=   100, a30  =200/3 + 1  ",
    )
    .unwrap();
    assert_eq!(plan.action, Action::Update);
    let targets: Vec<usize> = plan.update_assignments.iter().map(|(i, _)| *i).collect();
    assert_eq!(targets, vec![1, 2, 8, 30]);
    assert!(matches!(
        plan.update_assignments[1].1,
        Expr::Cond { .. }
    ));

    // optional SET prefix
    let plan = query::parse("update set a2= \"x\" ").unwrap();
    assert_eq!(plan.update_assignments.len(), 1);

    assert!(query::parse("update b2 = \"x\" join t.tsv on a1 == b1").is_err());
}

#[test]
fn test_select_star_splice_positions() {
    let plan = query::parse("select *, a1,  a2,a1,*,*,b1, * ,   *  join t.tsv on a1 == b1").unwrap();
    let shape: Vec<&str> = plan
        .select_items
        .iter()
        .map(|item| match item {
            SelectItem::Star => "*",
            SelectItem::Expr(_) => "e",
            _ => "?",
        })
        .collect();
    assert_eq!(shape, vec!["*", "e", "e", "e", "*", "*", "e", "*", "*"]);
}

#[test]
fn test_commas_inside_parens_do_not_split() {
    let plan = query::parse("select re.search(\"a,b\", a1), a2").unwrap();
    assert_eq!(plan.select_items.len(), 2);
}

#[test]
fn test_top_distinct_and_limit() {
    let plan = query::parse("select top 2 distinct count a1 where int(a2) > 10").unwrap();
    assert_eq!(plan.top, Some(2));
    assert_eq!(plan.distinct, DistinctMode::DistinctCount);

    let plan = query::parse("select distinct a1 limit   3  ").unwrap();
    assert_eq!(plan.top, Some(3));
    assert_eq!(plan.distinct, DistinctMode::Distinct);

    assert!(query::parse("select top 2 a1 limit 3").is_err());
}

#[test]
fn test_aggregates_must_be_whole_items() {
    let plan = query::parse("select a1, MIN(int(a2) * 10), COUNT(*) group by a1").unwrap();
    assert!(plan.is_aggregate());

    assert!(query::parse("select MIN(a1) + 1").is_err());
    assert!(query::parse("select a1 where MAX(a2) == \"1\"").is_err());
    assert!(query::parse("select a1, MIN(MAX(a2))").is_err());
}

#[test]
fn test_unfold_restrictions() {
    let plan = query::parse("select a1, UNFOLD(a2.split(\"|\"))").unwrap();
    assert!(plan.has_unfold());

    assert!(query::parse("select UNFOLD(a1), UNFOLD(a2)").is_err());
    assert!(query::parse("select UNFOLD(a1) group by a2").is_err());
}

#[test]
fn test_update_rejects_select_modifiers() {
    assert!(query::parse("update a1 = \"x\" order by a1").is_err());
    assert!(query::parse("update a1 = \"x\" group by a1").is_err());
    assert!(query::parse("update a1 = \"x\" limit 5").is_err());
}

#[test]
fn test_b_columns_require_a_join() {
    let err = query::parse("select b1, a1").unwrap_err();
    assert!(err.to_string().contains("JOIN"));
}

#[test]
fn test_query_must_open_with_action() {
    assert!(query::parse("delete a1").is_err());
    assert!(query::parse("  ").is_err());
}

#[test]
fn test_group_and_order_lists() {
    let plan = query::parse("select a1, COUNT(*) group by a1, a2 order by a2, int(a1)").unwrap();
    assert_eq!(plan.group_by.as_ref().unwrap().len(), 2);
    assert_eq!(plan.order_by.as_ref().unwrap().keys.len(), 2);
    assert!(!plan.order_by.as_ref().unwrap().reverse);
}

#[test]
fn test_counters_parse_as_counters() {
    let plan = query::parse("select NR, NF, NU").unwrap();
    assert_eq!(
        plan.select_items,
        vec![
            SelectItem::Expr(Expr::Counter(Counter::Nr)),
            SelectItem::Expr(Expr::Counter(Counter::Nf)),
            SelectItem::Expr(Expr::Counter(Counter::Nu)),
        ]
    );
}

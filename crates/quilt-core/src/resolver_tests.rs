use super::*;
use quilt_protocols::Manifest;

fn manifest(name: &str, dependencies: &[&str]) -> Arc<Manifest> {
    let mut m = Manifest::new(name);
    for dep in dependencies {
        m = m.with_dependency(*dep, "*");
    }
    Arc::new(m)
}

#[test]
fn test_diamond_resolves_into_three_waves() {
    // a depends on b and c, c depends on d
    let batch = vec![
        manifest("a", &["b", "c"]),
        manifest("b", &[]),
        manifest("c", &["d"]),
        manifest("d", &[]),
    ];

    let waves = priority_sequence(&batch, &[]).unwrap();
    assert_eq!(
        waves,
        vec![
            vec!["b".to_string(), "d".to_string()],
            vec!["c".to_string()],
            vec!["a".to_string()],
        ]
    );
}

#[test]
fn test_independent_manifests_share_one_wave() {
    let batch = vec![manifest("x", &[]), manifest("y", &[]), manifest("z", &[])];
    let waves = priority_sequence(&batch, &[]).unwrap();
    assert_eq!(waves.len(), 1);
    assert_eq!(waves[0].len(), 3);
}

#[test]
fn test_cycle_is_fatal() {
    let batch = vec![manifest("a", &["b"]), manifest("b", &["a"])];
    let err = priority_sequence(&batch, &[]).unwrap_err();
    assert!(matches!(err, KernelError::CyclicDependency(_)));
    assert!(err.to_string().contains('a'));
    assert!(err.to_string().contains('b'));
}

#[test]
fn test_already_activated_dependency_is_seeded() {
    // b is not in this batch but was activated by an earlier event
    let batch = vec![manifest("a", &["b"])];
    let waves = priority_sequence(&batch, &["b".to_string()]).unwrap();
    assert_eq!(
        waves,
        vec![vec!["b".to_string()], vec!["a".to_string()]]
    );
}

#[test]
fn test_missing_dependency_cannot_resolve() {
    // dependency absent from the batch and not activated: the edge dangles
    let batch = vec![manifest("a", &["ghost"])];
    let err = priority_sequence(&batch, &[]).unwrap_err();
    assert!(matches!(err, KernelError::CyclicDependency(_)));
}

#[test]
fn test_build_dag_records_edges() {
    let batch = vec![manifest("a", &["b"]), manifest("b", &[])];
    let dag = build_dag(&batch, &[]);
    assert_eq!(dag.names, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(dag.edges, vec![("a".to_string(), "b".to_string())]);
}

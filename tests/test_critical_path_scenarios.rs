//! Critical-path weight renormalization, end-to-end (spec.md §8 scenario 3,
//! invariant 4).

use chainforge_orchestrator::analysis::critical_path::CriticalPathAnalyzer;
use chainforge_orchestrator::domain::params::GlobalParameterVector;

#[test]
fn scenario_three_renormalizes_towards_the_dominant_proposal() {
    let mut analyzer = CriticalPathAnalyzer::new(&GlobalParameterVector::default());
    analyzer.update_weights(0.8, 0.1, 0.1);
    let w = analyzer.weights();

    // invariant 4: alpha + beta + gamma == 1, each in [0,1]
    assert!((w.temporal + w.resource + w.dependency - 1.0).abs() < 1e-9);
    for component in [w.temporal, w.resource, w.dependency] {
        assert!((0.0..=1.0).contains(&component));
    }
    assert!(w.temporal > w.resource);
    assert!((w.resource - w.dependency).abs() < 1e-12);
    assert!(w.temporal > 0.5);
}

#[test]
fn update_weights_then_identity_update_is_a_fixed_point() {
    let mut analyzer = CriticalPathAnalyzer::new(&GlobalParameterVector::default());
    analyzer.update_weights(0.8, 0.1, 0.1);
    let after_first = analyzer.weights();
    analyzer.update_weights(after_first.temporal, after_first.resource, after_first.dependency);
    let after_second = analyzer.weights();
    assert!((after_first.temporal - after_second.temporal).abs() < 1e-9);
    assert!((after_first.resource - after_second.resource).abs() < 1e-9);
    assert!((after_first.dependency - after_second.dependency).abs() < 1e-9);
}

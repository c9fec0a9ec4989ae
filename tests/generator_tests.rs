use std::collections::HashSet;

use volplan::error::GenerateError;
use volplan::generator::{count_plans, generate_plans, PlanGenerator};
use volplan::names::{NamePolicy, SequentialNames};
use volplan::operation::{OpKind, Plan, Step};
use volplan::state::LegalityState;

mod helpers;
use helpers::short_names;

fn render(plans: &[Plan]) -> Vec<String> {
    plans.iter().map(ToString::to_string).collect()
}

#[test]
fn length_two_catalog_matches_hand_enumeration() {
    let plans = PlanGenerator::with_names(short_names()).generate(2).unwrap();
    assert_eq!(
        render(&plans),
        vec![
            "[createVolume(v0), attachConsumer(c, v0)]",
            "[createVolume(v0), createSnapshot(s, v0)]",
            "[createVolume(v0), cloneVolume(k, v0)]",
            "[createVolume(v0), deleteVolume(v0)]",
            "[createVolume(v0), resizeVolume(v0, 5Gi)]",
            "[createVolume(v0), createResizedClone(k, v0, 5Gi)]",
        ]
    );
}

#[test]
fn length_three_catalog_matches_hand_enumeration() {
    let plans = PlanGenerator::with_names(short_names()).generate(3).unwrap();
    assert_eq!(
        render(&plans),
        vec![
            "[createVolume(v0), attachConsumer(c, v0), createSnapshot(s, v0)]",
            "[createVolume(v0), attachConsumer(c, v0), cloneVolume(k, v0)]",
            "[createVolume(v0), attachConsumer(c, v0), deleteVolume(v0)]",
            "[createVolume(v0), attachConsumer(c, v0), resizeVolume(v0, 5Gi)]",
            "[createVolume(v0), attachConsumer(c, v0), createResizedClone(k, v0, 5Gi)]",
            "[createVolume(v0), createSnapshot(s, v0), attachConsumer(c, v0)]",
            "[createVolume(v0), createSnapshot(s, v0), restoreFromSnapshot(r, s)]",
            "[createVolume(v0), createSnapshot(s, v0), cloneVolume(k, v0)]",
            "[createVolume(v0), createSnapshot(s, v0), deleteVolume(v0)]",
            "[createVolume(v0), createSnapshot(s, v0), deleteSnapshot(s)]",
            "[createVolume(v0), createSnapshot(s, v0), resizeVolume(v0, 5Gi)]",
            "[createVolume(v0), createSnapshot(s, v0), createResizedRestore(r, s, 5Gi)]",
            "[createVolume(v0), createSnapshot(s, v0), createResizedClone(k, v0, 5Gi)]",
            "[createVolume(v0), cloneVolume(k, v0), attachConsumer(c, k)]",
            "[createVolume(v0), cloneVolume(k, v0), attachConsumer(c, v0)]",
            "[createVolume(v0), cloneVolume(k, v0), createSnapshot(s, k)]",
            "[createVolume(v0), cloneVolume(k, v0), createSnapshot(s, v0)]",
            "[createVolume(v0), cloneVolume(k, v0), deleteVolume(k)]",
            "[createVolume(v0), cloneVolume(k, v0), deleteVolume(v0)]",
            "[createVolume(v0), cloneVolume(k, v0), resizeVolume(v0, 5Gi)]",
            "[createVolume(v0), resizeVolume(v0, 5Gi), attachConsumer(c, v0)]",
            "[createVolume(v0), resizeVolume(v0, 5Gi), createSnapshot(s, v0)]",
            "[createVolume(v0), resizeVolume(v0, 5Gi), cloneVolume(k, v0)]",
            "[createVolume(v0), resizeVolume(v0, 5Gi), deleteVolume(v0)]",
            "[createVolume(v0), resizeVolume(v0, 5Gi), createResizedClone(k, v0, 5Gi)]",
            "[createVolume(v0), createResizedClone(k, v0, 5Gi), attachConsumer(c, k)]",
            "[createVolume(v0), createResizedClone(k, v0, 5Gi), attachConsumer(c, v0)]",
            "[createVolume(v0), createResizedClone(k, v0, 5Gi), createSnapshot(s, k)]",
            "[createVolume(v0), createResizedClone(k, v0, 5Gi), createSnapshot(s, v0)]",
            "[createVolume(v0), createResizedClone(k, v0, 5Gi), deleteVolume(k)]",
            "[createVolume(v0), createResizedClone(k, v0, 5Gi), deleteVolume(v0)]",
            "[createVolume(v0), createResizedClone(k, v0, 5Gi), resizeVolume(v0, 5Gi)]",
        ]
    );
}

#[test]
fn clones_are_never_cloned_or_resized() {
    let plans = PlanGenerator::with_names(short_names()).generate(3).unwrap();
    let text = render(&plans);
    assert!(!text.iter().any(|p| p.contains("cloneVolume(k, k")));
    assert!(!text.iter().any(|p| p.contains("resizeVolume(k")));
    // The clone is always listed before v0 because "k" < "v0".
    assert_eq!(
        text.iter()
            .position(|p| p == "[createVolume(v0), cloneVolume(k, v0), attachConsumer(c, k)]"),
        Some(13)
    );
}

#[test]
fn catalog_sizes_grow_as_expected() {
    let mut gen = PlanGenerator::new();
    let sizes: Vec<u64> = (1..=5).map(|len| gen.count(len).unwrap()).collect();
    assert_eq!(sizes, vec![1, 6, 32, 192, 1222]);
}

#[test]
fn length_two_contains_the_basic_lifecycle_plans() {
    let text = render(&PlanGenerator::with_names(short_names()).generate(2).unwrap());
    for expected in [
        "[createVolume(v0), attachConsumer(c, v0)]",
        "[createVolume(v0), createSnapshot(s, v0)]",
        "[createVolume(v0), deleteVolume(v0)]",
    ] {
        assert!(text.iter().any(|p| p == expected), "missing {expected}");
    }
    let resizes = |p: &String| p.matches("resizeVolume").count();
    assert!(text.iter().all(|p| resizes(p) <= 1));
}

#[test]
fn no_plan_resizes_the_same_volume_twice() {
    let plans = generate_plans(5).unwrap();
    for plan in &plans {
        let mut resized = HashSet::new();
        for op in plan {
            if op.op == "resizeVolume" {
                assert!(resized.insert(op.params[0].clone()), "double resize in {plan}");
            }
        }
    }
}

#[test]
fn generation_restores_the_seed_state() {
    let mut gen = PlanGenerator::with_names(short_names());
    gen.generate(4).unwrap();
    assert_eq!(gen.state(), &LegalityState::seeded("v0"));
}

#[test]
fn regenerating_yields_the_identical_catalog() {
    let mut gen = PlanGenerator::new();
    let first = gen.generate(4).unwrap();
    let second = gen.generate(4).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, generate_plans(4).unwrap());
}

#[test]
fn catalogs_have_no_duplicates_and_count_matches() {
    for len in 1..=5 {
        let plans = generate_plans(len).unwrap();
        let fingerprints: HashSet<String> = plans.iter().map(Plan::fingerprint).collect();
        assert_eq!(fingerprints.len(), plans.len(), "len={len}");
        assert_eq!(count_plans(len).unwrap(), plans.len() as u64);
    }
}

#[test]
fn every_plan_has_exactly_the_requested_length() {
    for plan in generate_plans(4).unwrap() {
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.operations()[0].op, "createVolume");
    }
}

#[test]
fn zero_length_is_a_configuration_error() {
    assert_eq!(
        PlanGenerator::new().generate(0).unwrap_err(),
        GenerateError::ZeroLength
    );
}

#[test]
fn sequential_names_never_reuse_a_name_within_a_plan() {
    let mut gen = PlanGenerator::with_allocator(NamePolicy::Sequential.allocator(short_names()));
    for plan in gen.generate(4).unwrap() {
        let mut created = HashSet::new();
        for op in &plan {
            let kind = op.kind().unwrap();
            let creates = !matches!(
                kind,
                OpKind::DeleteVolume | OpKind::DeleteSnapshot | OpKind::ResizeVolume
            );
            if creates {
                assert!(created.insert(op.params[0].clone()), "reused name in {plan}");
            }
        }
    }
}

#[test]
fn sequential_names_keep_same_kind_creations_apart() {
    // Two snapshots of different volumes get two snapshot names.
    let mut gen = PlanGenerator::with_names(SequentialNames::default());
    let plans = render(&gen.generate(4).unwrap());
    let two_snapshots = "[createVolume(vol-0), cloneVolume(vol-clone-0, vol-0), \
                         createSnapshot(vol-snapshot-0, vol-0), \
                         createSnapshot(vol-snapshot-1, vol-clone-0)]";
    assert!(plans.iter().any(|p| p == two_snapshots), "missing {two_snapshots}");

    // Fixed names reach the same shape by reusing the one snapshot name.
    let fixed = render(&generate_plans(4).unwrap());
    let reused = "[createVolume(vol), cloneVolume(vol-clone, vol), \
                  createSnapshot(vol-snapshot, vol), \
                  createSnapshot(vol-snapshot, vol-clone)]";
    assert!(fixed.iter().any(|p| p == reused), "missing {reused}");
}

#[test]
fn fixed_names_reattach_the_live_consumer_to_a_clone() {
    let plans = render(&generate_plans(4).unwrap());
    let expected = "[createVolume(vol), attachConsumer(consumer, vol), \
                    cloneVolume(vol-clone, vol), attachConsumer(consumer, vol-clone)]";
    assert!(plans.iter().any(|p| p == expected), "missing {expected}");

    let mut state = LegalityState::seeded("vol");
    for step in [
        Step::AttachConsumer {
            consumer: "consumer".into(),
            volume: "vol".into(),
        },
        Step::Clone {
            volume: "vol-clone".into(),
            source: "vol".into(),
            size: None,
        },
    ] {
        let _ = state.apply(&step).unwrap();
    }
    assert_eq!(
        state.check(&Step::AttachConsumer {
            consumer: "consumer".into(),
            volume: "vol-clone".into(),
        }),
        Ok(())
    );
}

#[test]
fn fixed_name_catalog_sizes_beyond_length_five() {
    assert_eq!(count_plans(6).unwrap(), 8106);
}

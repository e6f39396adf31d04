// Property-based tests for compiler and runtime invariants.
//
// Three categories:
// 1. Type classification: every canonical type lands in exactly one family
// 2. Cycle legality: generated feedback loops compile iff state breaks them
// 3. Scheduling: every compiled program keeps commits after all reads
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use patchflow::diag::ErrorKind;
use patchflow::pass::StageCert;
use patchflow::patch::Patch;
use patchflow::types::{
    Binding, Branch, CanonicalType, Cardinality, Extent, InstanceRef, PayloadType, Perspective,
    Temporality, TypeFamily, Unit,
};
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

fn arb_payload() -> impl Strategy<Value = PayloadType> {
    prop_oneof![
        Just(PayloadType::Float),
        Just(PayloadType::Int),
        Just(PayloadType::Bool),
        Just(PayloadType::Vec2),
        Just(PayloadType::Vec3),
        Just(PayloadType::Color),
        Just(PayloadType::Shape),
        Just(PayloadType::CameraProjection),
    ]
}

fn arb_unit() -> impl Strategy<Value = Unit> {
    prop_oneof![
        Just(Unit::None),
        Just(Unit::Scalar),
        Just(Unit::Normalized),
        Just(Unit::Phase),
        Just(Unit::Radians),
        Just(Unit::Seconds),
        Just(Unit::World),
    ]
}

fn arb_extent() -> impl Strategy<Value = Extent> {
    let cardinality = prop_oneof![
        Just(Cardinality::Zero),
        Just(Cardinality::One),
        "[a-z]{1,6}".prop_map(|id| Cardinality::Many(InstanceRef::new("array", id))),
    ];
    let temporality = prop_oneof![Just(Temporality::Continuous), Just(Temporality::Discrete)];
    let binding = prop_oneof![
        Just(Binding::Unbound),
        Just(Binding::Weak),
        Just(Binding::Strong),
        Just(Binding::Identity),
    ];
    let perspective = prop_oneof![
        Just(Perspective::Default),
        Just(Perspective::Local),
        Just(Perspective::World),
    ];
    let branch = prop_oneof![Just(Branch::Main), Just(Branch::Preview)];
    (cardinality, temporality, binding, perspective, branch).prop_map(
        |(cardinality, temporality, binding, perspective, branch)| Extent {
            cardinality,
            temporality,
            binding,
            perspective,
            branch,
        },
    )
}

/// How a generated chain of adders feeds back into itself.
#[derive(Debug, Clone, Copy)]
enum Loop {
    Open,
    Direct,
    Delayed,
}

/// `time.phase -> a0 -> a1 -> ... -> a{n-1}`, closed according to `closing`.
fn adder_chain(len: usize, closing: Loop) -> Patch {
    let mut p = Patch::new();
    p.block("time", "TimeRoot");
    for i in 0..len {
        p.block(&format!("a{i}"), "Add");
    }
    p.connect(("time", "phase"), ("a0", "a"));
    for i in 1..len {
        let (prev, next) = (format!("a{}", i - 1), format!("a{i}"));
        p.connect((&prev, "out"), (&next, "a"));
    }
    let last = format!("a{}", len - 1);
    match closing {
        Loop::Open => {}
        Loop::Direct => {
            p.connect((&last, "out"), ("a0", "b"));
        }
        Loop::Delayed => {
            p.block("delay", "UnitDelay");
            p.connect((&last, "out"), ("delay", "in"));
            p.connect(("delay", "out"), ("a0", "b"));
        }
    }
    p
}

fn arb_loop() -> impl Strategy<Value = Loop> {
    prop_oneof![Just(Loop::Open), Just(Loop::Direct), Just(Loop::Delayed)]
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn every_type_has_exactly_one_family(
        payload in arb_payload(),
        unit in arb_unit(),
        extent in arb_extent(),
    ) {
        let ty = CanonicalType::new(payload, unit, extent);
        let family = ty.family();
        let expected = match (&ty.extent.temporality, &ty.extent.cardinality) {
            (Temporality::Discrete, _) => TypeFamily::Event,
            (_, Cardinality::Many(_)) => TypeFamily::Field,
            _ => TypeFamily::Signal,
        };
        prop_assert_eq!(family, expected);
        prop_assert_eq!(ty.instance().is_some(), matches!(ty.extent.cardinality, Cardinality::Many(_)));
    }

    #[test]
    fn cycles_compile_only_through_state(len in 1usize..6, closing in arb_loop()) {
        let reg = patchflow::stdlib::standard_registry().unwrap();
        let patch = adder_chain(len, closing);
        match (closing, patchflow::compile(&patch, &reg)) {
            (Loop::Direct, Err(errors)) => {
                prop_assert!(errors
                    .iter()
                    .any(|e| e.kind() == Some(ErrorKind::CycleWithoutStateBoundary)));
            }
            (Loop::Direct, Ok(_)) => prop_assert!(false, "stateless loop compiled"),
            (_, Err(errors)) => prop_assert!(false, "{:?}", errors),
            (_, Ok(program)) => {
                let commits = program.schedule.phase2().len();
                let expected = usize::from(matches!(closing, Loop::Delayed));
                prop_assert_eq!(commits, expected);
            }
        }
    }

    #[test]
    fn commits_follow_every_phase_one_step(count in 0u32..24, chain in 1usize..5) {
        let reg = patchflow::stdlib::standard_registry().unwrap();
        for patch in [patchflow::demos::dots(count), adder_chain(chain, Loop::Delayed)] {
            let stages = patchflow::pipeline::compile_stages(
                &patch,
                &reg,
                &patchflow::pipeline::CompileOptions::default(),
            )
            .unwrap();
            prop_assert!(stages.schedule_cert.all_pass(), "{:?}", stages.schedule_cert.failed());
            let schedule = &stages.schedule;
            prop_assert!(schedule.phase1().iter().all(|s| !s.is_commit()));
            prop_assert!(schedule.phase2().iter().all(|s| s.is_commit()));
        }
    }

    #[test]
    fn one_instruction_per_element(count in 0u32..40) {
        let reg = patchflow::stdlib::standard_registry().unwrap();
        let program = patchflow::compile(&patchflow::demos::dots(count), &reg).unwrap();
        let mut state = patchflow::RuntimeState::new(&program);
        let mut pool = patchflow::BufferPool::new();
        let out = patchflow::execute_frame(
            &program,
            &mut state,
            &mut pool,
            0.0,
            &patchflow::ExternalInputs::new(),
        )
        .unwrap();
        prop_assert_eq!(out.draw.len(), count as usize);
        let mut ids: Vec<u64> = out.draw.iter().map(|d| d.element_id).collect();
        ids.dedup();
        prop_assert_eq!(ids.len(), count as usize);
    }
}

// demos.rs — Built-in demo patches
//
// Small authored patches used by the CLI, benches and end-to-end tests.

use crate::patch::Patch;

/// Names accepted by `by_name`.
pub const NAMES: [&str; 4] = ["dots", "ring", "feedback", "delay-loop"];

/// `count` dots on a horizontal line, colored by position. The count comes
/// from a `Const` block wired into the array.
pub fn dots(count: u32) -> Patch {
    let mut p = Patch::new();
    p.block("time", "TimeRoot");
    p.block("count", "Const").nums("value", &[f64::from(count)]);
    p.block("dots", "Array");
    p.block("line", "LineLayout");
    p.block("hue", "HueColor");
    p.block("render", "Render");
    p.connect(("count", "out"), ("dots", "count"));
    p.connect(("dots", "t"), ("line", "t"));
    p.connect(("dots", "t"), ("hue", "hue"));
    p.connect(("line", "pos"), ("render", "pos"));
    p.connect(("hue", "color"), ("render", "color"));
    p
}

/// A rotating ring of `count` dots built from the `DotRing` composite.
pub fn ring(count: u32) -> Patch {
    let mut p = Patch::new();
    p.block("time", "TimeRoot").num("period_ms", 4000.0);
    p.block("ring", "DotRing").num("count", f64::from(count));
    p.connect(("time", "phase"), ("ring", "phase"));
    p
}

/// An adder fed back into itself with no state in the loop. Rejected.
pub fn feedback() -> Patch {
    let mut p = Patch::new();
    p.block("time", "TimeRoot");
    p.block("add", "Add");
    p.connect(("time", "phase"), ("add", "a"));
    p.connect(("add", "out"), ("add", "b"));
    p
}

/// `feedback` with a `UnitDelay` closing the loop.
pub fn delay_loop() -> Patch {
    let mut p = Patch::new();
    p.block("time", "TimeRoot");
    p.block("add", "Add");
    p.block("delay", "UnitDelay");
    p.connect(("time", "phase"), ("add", "a"));
    p.connect(("add", "out"), ("delay", "in"));
    p.connect(("delay", "out"), ("add", "b"));
    p
}

pub fn by_name(name: &str, count: u32) -> Option<Patch> {
    match name {
        "dots" => Some(dots(count)),
        "ring" => Some(ring(count)),
        "feedback" => Some(feedback()),
        "delay-loop" => Some(delay_loop()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::ErrorKind;
    use crate::pipeline::compile;
    use crate::stdlib::standard_registry;

    #[test]
    fn every_demo_but_feedback_compiles() {
        let reg = standard_registry().unwrap();
        for name in NAMES {
            let patch = by_name(name, 6).unwrap();
            match (name, compile(&patch, &reg)) {
                ("feedback", Err(errors)) => {
                    assert!(errors
                        .iter()
                        .any(|e| e.kind() == Some(ErrorKind::CycleWithoutStateBoundary)));
                }
                ("feedback", Ok(_)) => panic!("feedback compiled"),
                (_, Err(errors)) => panic!("{name}: {errors:?}"),
                (_, Ok(_)) => {}
            }
        }
        assert!(by_name("nope", 1).is_none());
    }
}

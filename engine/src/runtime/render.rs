// runtime/render.rs — Render assembly
//
// Turns one render sink's per-element values into renderer-agnostic draw
// instructions, and blends old and new instruction sets while a domain
// crossfades.

use serde::Serialize;

use crate::id::TargetKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Circle,
    Square,
    Triangle,
}

impl ShapeKind {
    /// Decode a `shape` payload value. Unknown codes draw circles.
    pub fn from_code(code: f64) -> Self {
        match code.round() as i64 {
            1 => ShapeKind::Square,
            2 => ShapeKind::Triangle,
            _ => ShapeKind::Circle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Geometry {
    pub shape: ShapeKind,
}

/// World-space placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transform {
    pub translate: [f64; 2],
    /// Radians.
    pub rotate: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Style {
    /// RGBA in `[0, 1]`.
    pub fill: [f64; 4],
    pub opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawInstruction {
    pub target: TargetKey,
    pub element_id: u64,
    pub geometry: Geometry,
    pub transform: Transform,
    pub style: Style,
}

/// Per-element values of one sink, already continuity-applied.
pub struct SinkValues<'a> {
    pub count: usize,
    pub element_ids: Option<&'a [u64]>,
    /// `count × 2`.
    pub pos: &'a [f64],
    /// `count × 4`, or one broadcast color.
    pub color: &'a [f64],
    /// `count`, or one broadcast size.
    pub size: &'a [f64],
    pub shape: f64,
}

pub fn assemble(target: &TargetKey, v: &SinkValues<'_>) -> Vec<DrawInstruction> {
    let shape = ShapeKind::from_code(v.shape);
    (0..v.count)
        .map(|i| {
            let fill = component4(v.color, i);
            DrawInstruction {
                target: target.clone(),
                element_id: v.element_ids.map_or(i as u64, |ids| ids[i]),
                geometry: Geometry { shape },
                transform: Transform {
                    translate: [component(v.pos, 2, i, 0), component(v.pos, 2, i, 1)],
                    rotate: 0.0,
                    scale: component(v.size, 1, i, 0),
                },
                style: Style { fill, opacity: 1.0 },
            }
        })
        .collect()
}

fn component(data: &[f64], stride: usize, i: usize, c: usize) -> f64 {
    if data.len() <= c {
        return 0.0;
    }
    let base = if data.len() >= (i + 1) * stride { i * stride } else { 0 };
    data[base + c]
}

fn component4(data: &[f64], i: usize) -> [f64; 4] {
    [
        component(data, 4, i, 0),
        component(data, 4, i, 1),
        component(data, 4, i, 2),
        component(data, 4, i, 3),
    ]
}

/// Old output of a sink fading out while the new output fades in.
#[derive(Debug, Clone)]
pub struct Fade {
    pub old: Vec<DrawInstruction>,
    pub start_ms: f64,
    pub window_ms: f64,
}

impl Fade {
    /// Blend progress in `[0, 1]`.
    pub fn progress(&self, t_ms: f64) -> f64 {
        if self.window_ms <= 0.0 {
            return 1.0;
        }
        ((t_ms - self.start_ms) / self.window_ms).clamp(0.0, 1.0)
    }

    /// Old instructions at `1 − w` opacity followed by new ones at `w`.
    pub fn blend(&self, new: &[DrawInstruction], w: f64) -> Vec<DrawInstruction> {
        let fade = |d: &DrawInstruction, k: f64| {
            let mut d = d.clone();
            d.style.opacity *= k;
            d
        };
        self.old
            .iter()
            .map(|d| fade(d, 1.0 - w))
            .chain(new.iter().map(|d| fade(d, w)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TargetKey {
        TargetKey::new("render", "render")
    }

    #[test]
    fn assembles_one_instruction_per_element() {
        let ids = [3, 9];
        let v = SinkValues {
            count: 2,
            element_ids: Some(&ids),
            pos: &[0.1, 0.2, 0.3, 0.4],
            color: &[1.0, 0.0, 0.0, 1.0],
            size: &[0.05],
            shape: 1.0,
        };
        let draw = assemble(&key(), &v);
        assert_eq!(draw.len(), 2);
        assert_eq!(draw[1].element_id, 9);
        assert_eq!(draw[1].transform.translate, [0.3, 0.4]);
        assert_eq!(draw[1].style.fill, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(draw[1].transform.scale, 0.05);
        assert_eq!(draw[0].geometry.shape, ShapeKind::Square);
    }

    #[test]
    fn element_index_is_the_fallback_id() {
        let v = SinkValues {
            count: 3,
            element_ids: None,
            pos: &[0.0; 6],
            color: &[1.0; 12],
            size: &[0.1, 0.2, 0.3],
            shape: 0.0,
        };
        let draw = assemble(&key(), &v);
        let ids: Vec<u64> = draw.iter().map(|d| d.element_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(draw[2].transform.scale, 0.3);
    }

    #[test]
    fn unknown_shape_codes_draw_circles() {
        assert_eq!(ShapeKind::from_code(7.0), ShapeKind::Circle);
        assert_eq!(ShapeKind::from_code(2.0), ShapeKind::Triangle);
    }

    #[test]
    fn fade_blends_opacity() {
        let v = SinkValues {
            count: 1,
            element_ids: None,
            pos: &[0.0, 0.0],
            color: &[1.0; 4],
            size: &[0.1],
            shape: 0.0,
        };
        let old = assemble(&key(), &v);
        let fade = Fade {
            old,
            start_ms: 100.0,
            window_ms: 200.0,
        };
        let w = fade.progress(150.0);
        assert!((w - 0.25).abs() < 1e-12);
        let out = fade.blend(&assemble(&key(), &v), w);
        assert_eq!(out.len(), 2);
        assert!((out[0].style.opacity - 0.75).abs() < 1e-12);
        assert!((out[1].style.opacity - 0.25).abs() < 1e-12);
        assert_eq!(fade.progress(1000.0), 1.0);
    }
}

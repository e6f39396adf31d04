// types.rs — The canonical five-axis type system
//
// A value's type is `{payload, unit, extent}`. `extent` carries five
// independent axes. Whether a value is a signal, a field or an event is a
// function of cardinality and temporality (`CanonicalType::family`) and is
// never stored anywhere else.
//
// Preconditions: none (types only).
// Postconditions: every `CanonicalType` is fully concrete; type variables
//   live in `type_infer` and never reach this module's types.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Payload ─────────────────────────────────────────────────────────────────

/// What one element of a value is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PayloadType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Color,
    Shape,
    /// Enum code: 0 = orthographic, 1 = perspective.
    CameraProjection,
}

impl PayloadType {
    /// Number of `f64` components one element occupies in storage.
    pub fn stride(self) -> usize {
        match self {
            PayloadType::Float
            | PayloadType::Int
            | PayloadType::Bool
            | PayloadType::Shape
            | PayloadType::CameraProjection => 1,
            PayloadType::Vec2 => 2,
            PayloadType::Vec3 => 3,
            PayloadType::Color => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PayloadType::Float => "float",
            PayloadType::Int => "int",
            PayloadType::Bool => "bool",
            PayloadType::Vec2 => "vec2",
            PayloadType::Vec3 => "vec3",
            PayloadType::Color => "color",
            PayloadType::Shape => "shape",
            PayloadType::CameraProjection => "cameraProjection",
        }
    }
}

// ── Unit ────────────────────────────────────────────────────────────────────

/// Physical or semantic unit of a numeric payload.
///
/// `Phase` is measured in cycles on `[0, 1)`; consumers that need an angle
/// multiply by 2π themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Unit {
    None,
    Scalar,
    Normalized,
    Phase,
    Radians,
    Degrees,
    Seconds,
    Milliseconds,
    Count,
    World,
}

impl Unit {
    pub fn name(self) -> &'static str {
        match self {
            Unit::None => "none",
            Unit::Scalar => "scalar",
            Unit::Normalized => "normalized",
            Unit::Phase => "phase",
            Unit::Radians => "radians",
            Unit::Degrees => "degrees",
            Unit::Seconds => "seconds",
            Unit::Milliseconds => "ms",
            Unit::Count => "count",
            Unit::World => "world",
        }
    }
}

// ── Extent axes ─────────────────────────────────────────────────────────────

/// Reference to a named domain of elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceRef {
    /// Kind of domain (e.g. `"array"`).
    pub domain_type: String,
    /// Stable id of the block that created the domain.
    pub instance_id: String,
}

impl InstanceRef {
    pub fn new(domain_type: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            domain_type: domain_type.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain_type, self.instance_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Cardinality {
    /// Compile-time constant.
    Zero,
    /// One value per frame.
    One,
    /// One value per element of the referenced domain.
    Many(InstanceRef),
}

impl Cardinality {
    /// Least upper bound used by cardinality-preserving operators:
    /// `zero ⊔ one = one`, `one ⊔ many(I) = many(I)`. Two different
    /// instances have no join.
    pub fn join(&self, other: &Cardinality) -> Option<Cardinality> {
        match (self, other) {
            (Cardinality::Many(a), Cardinality::Many(b)) => {
                if a == b {
                    Some(self.clone())
                } else {
                    None
                }
            }
            (Cardinality::Many(_), _) => Some(self.clone()),
            (_, Cardinality::Many(_)) => Some(other.clone()),
            (Cardinality::One, _) | (_, Cardinality::One) => Some(Cardinality::One),
            (Cardinality::Zero, Cardinality::Zero) => Some(Cardinality::Zero),
        }
    }

    pub fn instance(&self) -> Option<&InstanceRef> {
        match self {
            Cardinality::Many(i) => Some(i),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Temporality {
    Continuous,
    Discrete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Binding {
    Unbound,
    Weak,
    Strong,
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Perspective {
    Default,
    Local,
    World,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Branch {
    Main,
    Preview,
}

/// The five-axis shape descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Extent {
    pub cardinality: Cardinality,
    pub temporality: Temporality,
    pub binding: Binding,
    pub perspective: Perspective,
    pub branch: Branch,
}

impl Extent {
    pub fn new(cardinality: Cardinality, temporality: Temporality) -> Self {
        Self {
            cardinality,
            temporality,
            binding: Binding::Unbound,
            perspective: Perspective::Default,
            branch: Branch::Main,
        }
    }
}

// ── Derived classification ──────────────────────────────────────────────────

/// Signal / field / event classification. Only ever computed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeFamily {
    Signal,
    Field,
    Event,
}

// ── CanonicalType ───────────────────────────────────────────────────────────

/// The single authoritative type of every port and IR value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalType {
    pub payload: PayloadType,
    pub unit: Unit,
    pub extent: Extent,
}

impl CanonicalType {
    pub fn new(payload: PayloadType, unit: Unit, extent: Extent) -> Self {
        Self {
            payload,
            unit,
            extent,
        }
    }

    /// Continuous, cardinality-one value.
    pub fn signal(payload: PayloadType, unit: Unit) -> Self {
        Self::new(
            payload,
            unit,
            Extent::new(Cardinality::One, Temporality::Continuous),
        )
    }

    /// Continuous, cardinality-zero value.
    pub fn constant(payload: PayloadType, unit: Unit) -> Self {
        Self::new(
            payload,
            unit,
            Extent::new(Cardinality::Zero, Temporality::Continuous),
        )
    }

    /// Continuous per-element value over `instance`.
    pub fn field(payload: PayloadType, unit: Unit, instance: InstanceRef) -> Self {
        Self::new(
            payload,
            unit,
            Extent::new(Cardinality::Many(instance), Temporality::Continuous),
        )
    }

    /// Discrete, boolean, unit-less value.
    pub fn event() -> Self {
        Self::new(
            PayloadType::Bool,
            Unit::None,
            Extent::new(Cardinality::One, Temporality::Discrete),
        )
    }

    /// Total classification: `discrete ⇒ event`, else `many ⇒ field`,
    /// else `signal`.
    pub fn family(&self) -> TypeFamily {
        match (&self.extent.temporality, &self.extent.cardinality) {
            (Temporality::Discrete, _) => TypeFamily::Event,
            (Temporality::Continuous, Cardinality::Many(_)) => TypeFamily::Field,
            (Temporality::Continuous, _) => TypeFamily::Signal,
        }
    }

    pub fn stride(&self) -> usize {
        self.payload.stride()
    }

    pub fn instance(&self) -> Option<&InstanceRef> {
        self.extent.cardinality.instance()
    }

    /// Same type with a different cardinality.
    pub fn with_cardinality(&self, cardinality: Cardinality) -> Self {
        let mut t = self.clone();
        t.extent.cardinality = cardinality;
        t
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let card = match &self.extent.cardinality {
            Cardinality::Zero => "zero".to_string(),
            Cardinality::One => "one".to_string(),
            Cardinality::Many(i) => format!("many({i})"),
        };
        let temp = match self.extent.temporality {
            Temporality::Continuous => "cont",
            Temporality::Discrete => "disc",
        };
        write!(
            f,
            "{}<{}>[{}, {}]",
            self.payload.name(),
            self.unit.name(),
            card,
            temp
        )
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

//! The "ORBIT" Model - closed-form circular orbit propagation
//!
//! A body's position is a pure function of its static parameters and the
//! simulated time:
//! - The phase is the floored remainder of the simulated seconds by the period
//! - The initial offset is rotated by the phase angle inside the body's plane
//! - The axis normal to the plane keeps its initial value
//!
//! Bad parameters are rejected when a body is built, so `compute_position`
//! only ever fails for non-finite input.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::str::FromStr;
use tracing::warn;

use crate::error::{ComputationError, ConfigurationError};

/// Plane in which a body rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitalPlane {
    XY,
    XZ,
    YZ,
}

impl OrbitalPlane {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrbitalPlane::XY => "XY",
            OrbitalPlane::XZ => "XZ",
            OrbitalPlane::YZ => "YZ",
        }
    }
}

impl std::fmt::Display for OrbitalPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrbitalPlane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "XY" => Ok(OrbitalPlane::XY),
            "XZ" => Ok(OrbitalPlane::XZ),
            "YZ" => Ok(OrbitalPlane::YZ),
            _ => Err(format!("Unknown orbital plane: {}", s)),
        }
    }
}

/// What to do with a plane string that is not XY, XZ or YZ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPlanePolicy {
    /// Treat the body as rotating in XY and log a warning
    #[default]
    FallbackToXy,
    /// Refuse to load the body
    Reject,
}

impl UnknownPlanePolicy {
    /// Resolves a raw plane string for the named body.
    pub fn resolve(self, body_name: &str, raw: &str) -> Result<OrbitalPlane, ConfigurationError> {
        match raw.parse::<OrbitalPlane>() {
            Ok(plane) => Ok(plane),
            Err(_) => match self {
                UnknownPlanePolicy::FallbackToXy => {
                    warn!(body = body_name, plane = raw, "Unknown orbital plane, falling back to XY");
                    Ok(OrbitalPlane::XY)
                }
                UnknownPlanePolicy::Reject => Err(ConfigurationError::UnknownPlane {
                    name: body_name.to_string(),
                    plane: raw.to_string(),
                }),
            },
        }
    }
}

/// Rotation sense within the orbital plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Counter-clockwise when looking down the plane normal (+1)
    Prograde,
    /// Clockwise (-1)
    Retrograde,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Prograde => 1.0,
            Direction::Retrograde => -1.0,
        }
    }

    fn from_sign(body_name: &str, direction: i32) -> Result<Self, ConfigurationError> {
        match direction {
            1 => Ok(Direction::Prograde),
            -1 => Ok(Direction::Retrograde),
            other => Err(ConfigurationError::InvalidDirection {
                name: body_name.to_string(),
                direction: other,
            }),
        }
    }
}

// ============================================================================
// BODIES
// ============================================================================

/// A body as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySpec {
    pub name: String,

    /// Initial offset [x, y, z] at simulated time zero
    pub offset: [f64; 3],

    /// Orbital period in simulated seconds
    pub period_secs: f64,

    /// +1 or -1
    #[serde(default = "default_direction")]
    pub direction: i32,

    /// "XY", "XZ" or "YZ"; anything else goes through `UnknownPlanePolicy`
    #[serde(default = "default_plane")]
    pub plane: String,
}

fn default_direction() -> i32 {
    1
}

fn default_plane() -> String {
    OrbitalPlane::XY.as_str().to_string()
}

impl BodySpec {
    pub fn new(name: &str, offset: [f64; 3], period_secs: f64) -> Self {
        Self {
            name: name.to_string(),
            offset,
            period_secs,
            direction: default_direction(),
            plane: default_plane(),
        }
    }

    pub fn with_direction(mut self, direction: i32) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_plane(mut self, plane: &str) -> Self {
        self.plane = plane.to_string();
        self
    }
}

/// A validated, immutable orbiting body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Body {
    name: String,
    offset: Vector3<f64>,
    period_secs: f64,
    direction: Direction,
    plane: OrbitalPlane,
}

impl Body {
    /// Builds a body, rejecting parameters that would make queries fail.
    pub fn new(
        name: &str,
        offset: Vector3<f64>,
        period_secs: f64,
        direction: Direction,
        plane: OrbitalPlane,
    ) -> Result<Self, ConfigurationError> {
        if name.trim().is_empty() {
            return Err(ConfigurationError::EmptyBodyName);
        }
        if !(period_secs.is_finite() && period_secs > 0.0) {
            return Err(ConfigurationError::NonPositivePeriod {
                name: name.to_string(),
                period: period_secs,
            });
        }
        if !offset.iter().all(|c| c.is_finite()) {
            return Err(ConfigurationError::NonFiniteOffset { name: name.to_string() });
        }
        Ok(Self {
            name: name.to_string(),
            offset,
            period_secs,
            direction,
            plane,
        })
    }

    /// Builds a body from its configuration row.
    pub fn from_spec(spec: &BodySpec, policy: UnknownPlanePolicy) -> Result<Self, ConfigurationError> {
        let direction = Direction::from_sign(&spec.name, spec.direction)?;
        let plane = policy.resolve(&spec.name, &spec.plane)?;
        let [x, y, z] = spec.offset;
        Self::new(&spec.name, Vector3::new(x, y, z), spec.period_secs, direction, plane)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> Vector3<f64> {
        self.offset
    }

    pub fn period_secs(&self) -> f64 {
        self.period_secs
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn plane(&self) -> OrbitalPlane {
        self.plane
    }
}

/// Position of one body at one simulated instant, as served to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyPosition {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl BodyPosition {
    pub fn new(name: &str, position: Vector3<f64>) -> Self {
        Self {
            name: name.to_string(),
            x: position.x,
            y: position.y,
            z: position.z,
        }
    }
}

// ============================================================================
// PROPAGATION
// ============================================================================

/// Floored modulo: the result is always in `[0, modulus)` for a positive modulus.
pub fn floor_mod(value: f64, modulus: f64) -> f64 {
    let r = value % modulus;
    let r = if r < 0.0 { r + modulus } else { r };
    // A tiny negative remainder can round up to exactly `modulus`
    if r >= modulus {
        0.0
    } else {
        r
    }
}

/// Signed rotation angle (radians) of the body at the given simulated time.
pub fn orbit_angle(body: &Body, sim_seconds: f64) -> Result<f64, ComputationError> {
    if !sim_seconds.is_finite() {
        return Err(ComputationError::NonFiniteSeconds(sim_seconds));
    }
    let phase = floor_mod(sim_seconds, body.period_secs);
    Ok(body.direction.sign() * phase * TAU / body.period_secs)
}

/// Computes the body's position at the given simulated time.
///
/// At whole multiples of the period the initial offset is returned exactly.
pub fn compute_position(body: &Body, sim_seconds: f64) -> Result<Vector3<f64>, ComputationError> {
    let angle = orbit_angle(body, sim_seconds)?;
    if angle == 0.0 {
        return Ok(body.offset);
    }

    let (sin, cos) = angle.sin_cos();
    let o = body.offset;
    Ok(match body.plane {
        OrbitalPlane::XY => Vector3::new(o.x * cos - o.y * sin, o.x * sin + o.y * cos, o.z),
        OrbitalPlane::XZ => Vector3::new(o.x * cos - o.z * sin, o.y, o.x * sin + o.z * cos),
        OrbitalPlane::YZ => Vector3::new(o.x, o.y * cos - o.z * sin, o.y * sin + o.z * cos),
    })
}

// ============================================================================
// REGISTRY
// ============================================================================

/// The static body table of one instance, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct BodyRegistry {
    bodies: Vec<Body>,
    index: HashMap<String, usize>,
}

impl BodyRegistry {
    /// Validates every spec; the first bad body aborts the load.
    pub fn from_specs(specs: &[BodySpec], policy: UnknownPlanePolicy) -> Result<Self, ConfigurationError> {
        let mut registry = Self::default();
        for spec in specs {
            registry.insert(Body::from_spec(spec, policy)?)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, body: Body) -> Result<(), ConfigurationError> {
        if self.index.contains_key(body.name()) {
            return Err(ConfigurationError::DuplicateBody(body.name().to_string()));
        }
        self.index.insert(body.name().to_string(), self.bodies.len());
        self.bodies.push(body);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Body> {
        self.index.get(name).map(|&i| &self.bodies[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.bodies.iter().map(Body::name).collect()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

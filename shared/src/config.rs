/// Table geometry (meters)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    pub width: f32,
    pub height: f32,
    pub ball_radius: f32,
    pub pocket_radius: f32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            width: 2.24,
            height: 1.12,
            ball_radius: 0.031,
            pocket_radius: 0.05,
        }
    }
}

/// Physics configuration
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PhysicsConfig {
    /// Fixed simulation steps per second
    pub step_rate_hz: u32,
    /// Upper bound on steps run for a single frame
    pub max_steps_per_frame: u32,
    pub ball_linear_damping: f32,
    pub ball_angular_damping: f32,
    pub ball_friction: f32,
    pub ball_restitution: f32,
    pub ball_density: f32,
    pub rail_friction: f32,
    pub rail_restitution: f32,
    /// Below this linear speed (m/s) a ball counts as resting
    pub rest_speed: f32,
    /// Below this angular speed (rad/s) a ball counts as resting
    pub rest_angular_speed: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            step_rate_hz: 60,
            max_steps_per_frame: 10,
            ball_linear_damping: 1.5,
            ball_angular_damping: 1.0,
            ball_friction: 0.1,
            ball_restitution: 0.99,
            ball_density: 1.0,
            rail_friction: 0.1,
            rail_restitution: 0.9,
            rest_speed: 0.01,
            rest_angular_speed: 0.1,
        }
    }
}

impl PhysicsConfig {
    pub fn step_seconds(&self) -> f32 {
        1.0 / self.step_rate_hz as f32
    }
}

/// Cue drag-to-shoot tuning
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CueConfig {
    /// Drags shorter than this (meters) are cancelled
    pub min_shot_distance: f32,
    /// Drag length giving full power (meters)
    pub max_shot_distance: f32,
    /// Impulse magnitude at full power (N*s)
    pub max_impulse: f32,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            min_shot_distance: 0.05,
            max_shot_distance: 0.3,
            max_impulse: 0.1,
        }
    }
}

/// Which balls go where in the rack
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum RackStyle {
    /// Solids and stripes in random slots, black in the center
    Shuffled,
    /// Fixed 7 red / 7 yellow layout, black in the center
    Regional,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RulesConfig {
    pub rack_style: RackStyle,
    /// Delay before a pocketed cue ball is put back on the table (ms)
    pub respot_delay_ms: u32,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rack_style: RackStyle::Shuffled,
            respot_delay_ms: 400,
        }
    }
}

/// Everything a match needs to know, shared with clients in the welcome message.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    pub table: TableConfig,
    pub physics: PhysicsConfig,
    pub cue: CueConfig,
    pub rules: RulesConfig,
}

fn positive(name: &str, v: f32) -> Result<(), String> {
    if !v.is_finite() || v <= 0.0 {
        return Err(format!("{} must be finite and > 0", name));
    }
    Ok(())
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), String> {
        let t = &self.table;
        positive("table.width", t.width)?;
        positive("table.height", t.height)?;
        positive("table.ball_radius", t.ball_radius)?;
        positive("table.pocket_radius", t.pocket_radius)?;
        if t.pocket_radius <= t.ball_radius {
            return Err("table.pocket_radius must be > table.ball_radius".to_string());
        }
        // The rack spans ~9 radii from the apex at width/4.
        if t.ball_radius * 10.0 > t.width / 4.0 || t.ball_radius * 12.0 > t.height {
            return Err("table is too small for a full rack".to_string());
        }

        let p = &self.physics;
        if p.step_rate_hz == 0 {
            return Err("physics.step_rate_hz must be > 0".to_string());
        }
        if p.max_steps_per_frame == 0 {
            return Err("physics.max_steps_per_frame must be > 0".to_string());
        }
        positive("physics.ball_density", p.ball_density)?;
        positive("physics.rest_speed", p.rest_speed)?;
        positive("physics.rest_angular_speed", p.rest_angular_speed)?;
        for (name, v) in [
            ("physics.ball_linear_damping", p.ball_linear_damping),
            ("physics.ball_angular_damping", p.ball_angular_damping),
            ("physics.ball_friction", p.ball_friction),
            ("physics.rail_friction", p.rail_friction),
            ("physics.ball_restitution", p.ball_restitution),
            ("physics.rail_restitution", p.rail_restitution),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("{} must be finite and >= 0", name));
            }
        }

        let c = &self.cue;
        positive("cue.min_shot_distance", c.min_shot_distance)?;
        positive("cue.max_impulse", c.max_impulse)?;
        if !c.max_shot_distance.is_finite() || c.max_shot_distance < c.min_shot_distance {
            return Err("cue.max_shot_distance must be finite and >= min_shot_distance".to_string());
        }
        Ok(())
    }
}

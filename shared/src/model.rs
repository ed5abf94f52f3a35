//! Entity model for a billiards match.
//!
//! Plain data only. Every component reads and writes the single [`MatchContext`]
//! owned by the match coordinator.

use glam::Vec2;
use std::fmt;

/// Stable identity of a table entity (`ball-3`, `pocket-1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(pub String);

impl EntityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Hands out keys that are unique within one match.
#[derive(Debug, Clone, Default)]
pub struct KeyGen {
    next: u32,
}

impl KeyGen {
    pub fn next(&mut self, prefix: &str) -> EntityKey {
        self.next += 1;
        EntityKey(format!("{}-{}", prefix, self.next))
    }
}

/// Base hue of a numbered ball.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hue {
    Yellow,
    Red,
    Burgundy,
    Orange,
    Green,
    Purple,
    Blue,
}

impl Hue {
    pub const ALL: [Hue; 7] = [
        Hue::Yellow,
        Hue::Red,
        Hue::Burgundy,
        Hue::Orange,
        Hue::Green,
        Hue::Purple,
        Hue::Blue,
    ];

    fn name(self) -> &'static str {
        match self {
            Hue::Yellow => "yellow",
            Hue::Red => "red",
            Hue::Burgundy => "burgundy",
            Hue::Orange => "orange",
            Hue::Green => "green",
            Hue::Purple => "purple",
            Hue::Blue => "blue",
        }
    }
}

/// Ball color. The group a ball belongs to is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BallColor {
    White,
    Black,
    Solid(Hue),
    Stripe(Hue),
    /// Regional rack colors
    Red,
    Yellow,
}

impl BallColor {
    /// The 14 group colors of the standard rack.
    pub fn group_colors() -> Vec<BallColor> {
        Hue::ALL
            .iter()
            .flat_map(|&h| [BallColor::Solid(h), BallColor::Stripe(h)])
            .collect()
    }

    pub fn group(self) -> Option<Group> {
        match self {
            BallColor::White | BallColor::Black => None,
            BallColor::Solid(_) => Some(Group::Solid),
            BallColor::Stripe(_) => Some(Group::Striped),
            BallColor::Red => Some(Group::Red),
            BallColor::Yellow => Some(Group::Yellow),
        }
    }

    pub fn is_cue(self) -> bool {
        self == BallColor::White
    }

    pub fn is_eight(self) -> bool {
        self == BallColor::Black
    }
}

impl fmt::Display for BallColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BallColor::White => f.write_str("white"),
            BallColor::Black => f.write_str("black"),
            BallColor::Solid(h) => write!(f, "{}-solid", h.name()),
            BallColor::Stripe(h) => write!(f, "{}-stripe", h.name()),
            BallColor::Red => f.write_str("red"),
            BallColor::Yellow => f.write_str("yellow"),
        }
    }
}

/// Ball group a player is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Striped,
    Solid,
    Red,
    Yellow,
}

impl Group {
    pub fn as_str(self) -> &'static str {
        match self {
            Group::Striped => "striped",
            Group::Solid => "solid",
            Group::Red => "red",
            Group::Yellow => "yellow",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub key: EntityKey,
    pub position: Vec2,
    pub radius: f32,
    pub color: BallColor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rail {
    pub key: EntityKey,
    /// Convex polygon, in order
    pub vertices: Vec<Vec2>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pocket {
    pub key: EntityKey,
    pub position: Vec2,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub key: EntityKey,
    pub width: f32,
    pub height: f32,
    pub ball_radius: f32,
    pub pocket_radius: f32,
}

impl Table {
    /// Where the cue ball is placed on break and after a foul
    pub fn cue_spot(&self) -> Vec2 {
        Vec2::new(-self.width / 4.0, 0.0)
    }

    /// Apex of the rack triangle
    pub fn foot_spot(&self) -> Vec2 {
        Vec2::new(self.width / 4.0, 0.0)
    }
}

/// Aiming gesture in progress. Lives from pointer-down to pointer-up.
#[derive(Debug, Clone, PartialEq)]
pub struct CueStick {
    pub ball: EntityKey,
    pub start: Vec2,
    pub end: Vec2,
}

/// Seat token, `turn-one` / `turn-two`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TurnToken(pub String);

impl fmt::Display for TurnToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Turn {
    pub turns: Vec<TurnToken>,
    pub current: Option<TurnToken>,
}

impl Turn {
    pub fn seats(tokens: &[&str]) -> Self {
        Self {
            turns: tokens.iter().map(|t| TurnToken(t.to_string())).collect(),
            current: None,
        }
    }

    /// Advance to the next seat; an unset turn advances to the first one.
    pub fn pass(&mut self) {
        if self.turns.is_empty() {
            return;
        }
        let next = match &self.current {
            Some(current) => self
                .turns
                .iter()
                .position(|t| t == current)
                .map_or(0, |i| (i + 1) % self.turns.len()),
            None => 0,
        };
        self.current = Some(self.turns[next].clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub String);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: Option<String>,
    pub group: Option<Group>,
    pub turn: Option<TurnToken>,
}

impl Player {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            name: None,
            group: None,
            turn: None,
        }
    }
}

/// The one mutable state of a match.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub table: Option<Table>,
    pub rails: Vec<Rail>,
    pub pockets: Vec<Pocket>,
    pub balls: Vec<Ball>,
    pub cue: Option<CueStick>,
    pub turn: Turn,
    pub players: Vec<Player>,
    /// Player driving this context's pointer input (clients only)
    pub local_player: Option<PlayerId>,
    pub shot_in_progress: bool,
    pub game_started: bool,
    pub game_over: bool,
    pub winner: Option<PlayerId>,
    /// No ball is moving
    pub sleep: bool,
    pub keys: KeyGen,
}

impl MatchContext {
    pub fn new() -> Self {
        Self {
            sleep: true,
            ..Default::default()
        }
    }

    pub fn cue_ball(&self) -> Option<&Ball> {
        self.balls.iter().find(|b| b.color.is_cue())
    }

    pub fn ball(&self, key: &EntityKey) -> Option<&Ball> {
        self.balls.iter().find(|b| &b.key == key)
    }

    /// Remove a ball by key, returning it if it was on the table.
    pub fn remove_ball(&mut self, key: &EntityKey) -> Option<Ball> {
        let index = self.balls.iter().position(|b| &b.key == key)?;
        Some(self.balls.remove(index))
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    /// Player holding the current turn token
    pub fn shooter(&self) -> Option<&Player> {
        let current = self.turn.current.as_ref()?;
        self.players.iter().find(|p| p.turn.as_ref() == Some(current))
    }

    /// Whether the local player may aim: no turn set, or the turn is theirs.
    pub fn is_my_turn(&self) -> bool {
        let Some(current) = &self.turn.current else {
            return true;
        };
        self.local_player
            .as_ref()
            .and_then(|id| self.player(id))
            .and_then(|p| p.turn.as_ref())
            .is_some_and(|mine| mine == current)
    }

    /// Balls of a group still on the table
    pub fn remaining_in_group(&self, group: Group) -> usize {
        self.balls
            .iter()
            .filter(|b| b.color.group() == Some(group))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_names_match_wire_format() {
        assert_eq!(BallColor::White.to_string(), "white");
        assert_eq!(BallColor::Stripe(Hue::Burgundy).to_string(), "burgundy-stripe");
        assert_eq!(BallColor::Solid(Hue::Blue).to_string(), "blue-solid");
        assert_eq!(BallColor::Red.to_string(), "red");
    }

    #[test]
    fn fourteen_group_colors_split_evenly() {
        let colors = BallColor::group_colors();
        assert_eq!(colors.len(), 14);
        let solids = colors.iter().filter(|c| c.group() == Some(Group::Solid)).count();
        let stripes = colors.iter().filter(|c| c.group() == Some(Group::Striped)).count();
        assert_eq!((solids, stripes), (7, 7));
    }

    #[test]
    fn pass_turn_wraps_around() {
        let mut turn = Turn::seats(&["turn-one", "turn-two"]);
        turn.pass();
        assert_eq!(turn.current, Some(TurnToken("turn-one".into())));
        turn.pass();
        assert_eq!(turn.current, Some(TurnToken("turn-two".into())));
        turn.pass();
        assert_eq!(turn.current, Some(TurnToken("turn-one".into())));
    }

    #[test]
    fn is_my_turn_without_turn_set() {
        let ctx = MatchContext::new();
        assert!(ctx.is_my_turn());
    }

    #[test]
    fn is_my_turn_checks_local_token() {
        let mut ctx = MatchContext::new();
        ctx.turn = Turn::seats(&["turn-one", "turn-two"]);
        ctx.turn.pass();
        let mut me = Player::new(PlayerId("me".into()));
        me.turn = Some(TurnToken("turn-two".into()));
        ctx.players.push(me);
        ctx.local_player = Some(PlayerId("me".into()));
        assert!(!ctx.is_my_turn());
        ctx.turn.pass();
        assert!(ctx.is_my_turn());
    }

    #[test]
    fn remove_ball_unknown_key_is_none() {
        let mut ctx = MatchContext::new();
        assert!(ctx.remove_ball(&EntityKey::from("ball-9")).is_none());
    }
}

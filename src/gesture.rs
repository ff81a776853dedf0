// src/gesture.rs - Edge-triggered hand gestures and screen region hover
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::joints::{Joint, TrackingState, HAND_LEFT, HAND_RIGHT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const ALL: [Hand; 2] = [Hand::Left, Hand::Right];

    pub fn joint_name(&self) -> &'static str {
        match self {
            Hand::Left => HAND_LEFT,
            Hand::Right => HAND_RIGHT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Hand::Left => "left",
            Hand::Right => "right",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureEvent {
    /// Hand went from not-closed to closed this tick.
    HandClosed { hand: Hand },
    RegionEntered { hand: Hand, region: String },
    RegionLeft { hand: Hand, region: String },
    /// Hand closed while hovering the region.
    RegionPressed { hand: Hand, region: String },
}

impl GestureEvent {
    pub fn hand(&self) -> Hand {
        match self {
            GestureEvent::HandClosed { hand }
            | GestureEvent::RegionEntered { hand, .. }
            | GestureEvent::RegionLeft { hand, .. }
            | GestureEvent::RegionPressed { hand, .. } => *hand,
        }
    }

    pub fn label(&self) -> String {
        match self {
            GestureEvent::HandClosed { hand } => format!("{}_closed", hand.as_str()),
            GestureEvent::RegionEntered { hand, region } => format!("{}_enter:{}", hand.as_str(), region),
            GestureEvent::RegionLeft { hand, region } => format!("{}_leave:{}", hand.as_str(), region),
            GestureEvent::RegionPressed { hand, region } => format!("{}_press:{}", hand.as_str(), region),
        }
    }
}

/// Named axis-aligned screen rectangle, e.g. a button's bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRegion {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRegion {
    pub fn new(name: &str, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { name: name.to_string(), x, y, width, height }
    }

    pub fn contains(&self, position: Vector2<f64>) -> bool {
        position.x >= self.x
            && position.x <= self.x + self.width
            && position.y >= self.y
            && position.y <= self.y + self.height
    }
}

/// Regions containing `position`, in declaration order.
pub fn regions_at(regions: &[ScreenRegion], position: Vector2<f64>) -> impl Iterator<Item = &ScreenRegion> {
    regions.iter().filter(move |region| region.contains(position))
}

/// Closed-hand edge latch for one hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedEdge {
    was_closed: bool,
}

impl ClosedEdge {
    /// True only on the tick the hand becomes closed. The latch is updated
    /// every call whether or not the edge fired.
    pub fn update(&mut self, is_closed: bool) -> bool {
        let fired = is_closed && !self.was_closed;
        self.was_closed = is_closed;
        fired
    }

    pub fn was_closed(&self) -> bool {
        self.was_closed
    }
}

pub struct GestureDetector {
    edges: HashMap<Hand, ClosedEdge>,
    regions: Vec<ScreenRegion>,
    hovering: HashMap<Hand, BTreeSet<String>>,
}

impl GestureDetector {
    pub fn new(regions: Vec<ScreenRegion>) -> Self {
        Self {
            edges: HashMap::new(),
            regions,
            hovering: HashMap::new(),
        }
    }

    pub fn regions(&self) -> &[ScreenRegion] {
        &self.regions
    }

    pub fn regions_at(&self, position: Vector2<f64>) -> Vec<&ScreenRegion> {
        regions_at(&self.regions, position).collect()
    }

    pub fn hovered(&self, hand: Hand) -> impl Iterator<Item = &str> {
        self.hovering
            .get(&hand)
            .into_iter()
            .flat_map(|names| names.iter().map(String::as_str))
    }

    /// Edge-detect a closed hand. `None` (absent or stale joint) reads as open.
    pub fn evaluate(&mut self, hand: Hand, joint: Option<&Joint>) -> Option<GestureEvent> {
        let is_closed = joint
            .map(|j| j.is_closed() && j.tracking_state != TrackingState::NotTracked)
            .unwrap_or(false);

        self.edges
            .entry(hand)
            .or_default()
            .update(is_closed)
            .then_some(GestureEvent::HandClosed { hand })
    }

    /// Diff the hand's hovered regions against last tick. A hand with no
    /// screen position leaves every region it was hovering.
    pub fn update_hover(&mut self, hand: Hand, position: Option<Vector2<f64>>) -> Vec<GestureEvent> {
        let now: BTreeSet<String> = match position {
            Some(position) => regions_at(&self.regions, position).map(|r| r.name.clone()).collect(),
            None => BTreeSet::new(),
        };
        let before = self.hovering.entry(hand).or_default();

        let mut events: Vec<GestureEvent> = before
            .difference(&now)
            .map(|region| GestureEvent::RegionLeft { hand, region: region.clone() })
            .collect();
        events.extend(
            now.difference(before)
                .map(|region| GestureEvent::RegionEntered { hand, region: region.clone() }),
        );

        *before = now;
        events
    }

    /// Full per-tick evaluation for one hand: hover changes, then the closed
    /// edge, then a press for every region hovered when the edge fired.
    pub fn evaluate_hand(
        &mut self,
        hand: Hand,
        joint: Option<&Joint>,
        screen_position: Option<Vector2<f64>>,
    ) -> Vec<GestureEvent> {
        let mut events = self.update_hover(hand, screen_position);
        if let Some(closed) = self.evaluate(hand, joint) {
            events.push(closed);
            let pressed: Vec<GestureEvent> = self
                .hovered(hand)
                .map(|region| GestureEvent::RegionPressed { hand, region: region.to_string() })
                .collect();
            events.extend(pressed);
        }
        events
    }
}

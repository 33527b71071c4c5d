//! Animation clips and the mixer that plays them on a mounted model

use glam::{Quat, Vec3};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::graph::{NodeId, SceneGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    Linear,
    /// Keyframe values are stored as `[in_tangent, value, out_tangent]` triples
    CubicSpline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelProperty {
    Translation,
    Rotation,
    Scale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Keyframes {
    Vec3(Vec<Vec3>),
    Quat(Vec<Quat>),
}

impl Keyframes {
    pub fn len(&self) -> usize {
        match self {
            Keyframes::Vec3(v) => v.len(),
            Keyframes::Quat(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keyframes driving one property of one asset node
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Index of the target node in the loaded asset
    pub target: usize,
    pub property: ChannelProperty,
    pub interpolation: Interpolation,
    pub times: Vec<f32>,
    pub values: Keyframes,
}

impl Channel {
    /// Check the keyframe layout; returns a description of the first problem found
    pub fn validate(&self) -> Result<(), String> {
        if self.times.is_empty() {
            return Err("channel has no keyframes".into());
        }
        if self.times.windows(2).any(|w| w[1] < w[0]) {
            return Err("keyframe times are not increasing".into());
        }
        let expected = match self.interpolation {
            Interpolation::CubicSpline => self.times.len() * 3,
            _ => self.times.len(),
        };
        if self.values.len() != expected {
            return Err(format!(
                "expected {} values for {} keyframes, found {}",
                expected,
                self.times.len(),
                self.values.len()
            ));
        }
        let type_matches = matches!(
            (self.property, &self.values),
            (ChannelProperty::Rotation, Keyframes::Quat(_))
                | (ChannelProperty::Translation, Keyframes::Vec3(_))
                | (ChannelProperty::Scale, Keyframes::Vec3(_))
        );
        if !type_matches {
            return Err(format!("{:?} channel has mismatched value type", self.property));
        }
        Ok(())
    }

    pub fn end_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Segment containing `t` and the normalised position inside it
    fn locate(&self, t: f32) -> Segment {
        let last = self.times.len() - 1;
        if t <= self.times[0] {
            return Segment::At(0);
        }
        if t >= self.times[last] {
            return Segment::At(last);
        }
        let next = self.times.partition_point(|&k| k <= t);
        let prev = next - 1;
        let span = self.times[next] - self.times[prev];
        if span <= f32::EPSILON {
            return Segment::At(next);
        }
        Segment::Between {
            prev,
            next,
            s: (t - self.times[prev]) / span,
            span,
        }
    }

    pub fn sample_vec3(&self, t: f32) -> Option<Vec3> {
        let Keyframes::Vec3(values) = &self.values else {
            return None;
        };
        let value = |k: usize| match self.interpolation {
            Interpolation::CubicSpline => values[k * 3 + 1],
            _ => values[k],
        };
        Some(match self.locate(t) {
            Segment::At(k) => value(k),
            Segment::Between { prev, next, s, span } => match self.interpolation {
                Interpolation::Step => value(prev),
                Interpolation::Linear => value(prev).lerp(value(next), s),
                Interpolation::CubicSpline => {
                    let out_tangent = values[prev * 3 + 2] * span;
                    let in_tangent = values[next * 3] * span;
                    hermite(value(prev), out_tangent, value(next), in_tangent, s)
                }
            },
        })
    }

    pub fn sample_quat(&self, t: f32) -> Option<Quat> {
        let Keyframes::Quat(values) = &self.values else {
            return None;
        };
        let value = |k: usize| match self.interpolation {
            Interpolation::CubicSpline => values[k * 3 + 1],
            _ => values[k],
        };
        let q = match self.locate(t) {
            Segment::At(k) => value(k),
            Segment::Between { prev, next, s, span } => match self.interpolation {
                Interpolation::Step => value(prev),
                Interpolation::Linear => value(prev).slerp(value(next), s),
                Interpolation::CubicSpline => {
                    let (p0, p1) = (value(prev), value(next));
                    let m0 = values[prev * 3 + 2] * span;
                    let m1 = values[next * 3] * span;
                    let (s2, s3) = (s * s, s * s * s);
                    p0 * (2.0 * s3 - 3.0 * s2 + 1.0)
                        + m0 * (s3 - 2.0 * s2 + s)
                        + p1 * (-2.0 * s3 + 3.0 * s2)
                        + m1 * (s3 - s2)
                }
            },
        };
        Some(if q.length_squared() > 0.0 {
            q.normalize()
        } else {
            Quat::IDENTITY
        })
    }
}

enum Segment {
    At(usize),
    Between { prev: usize, next: usize, s: f32, span: f32 },
}

fn hermite(p0: Vec3, m0: Vec3, p1: Vec3, m1: Vec3, s: f32) -> Vec3 {
    let s2 = s * s;
    let s3 = s2 * s;
    p0 * (2.0 * s3 - 3.0 * s2 + 1.0)
        + m0 * (s3 - 2.0 * s2 + s)
        + p1 * (-2.0 * s3 + 3.0 * s2)
        + m1 * (s3 - s2)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: Option<String>,
    pub duration: f32,
    pub channels: Vec<Channel>,
}

impl AnimationClip {
    pub fn new(name: Option<String>, channels: Vec<Channel>) -> Self {
        let duration = channels.iter().map(Channel::end_time).fold(0.0, f32::max);
        Self {
            name,
            duration,
            channels,
        }
    }
}

/// Playback state of one clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationAction {
    pub clip: usize,
    pub time: f32,
    pub playing: bool,
    pub looping: bool,
}

/// Plays clips against the scene nodes a model was mounted as
pub struct AnimationMixer {
    clips: Vec<AnimationClip>,
    /// Asset node index to scene node
    bindings: HashMap<usize, NodeId>,
    actions: Vec<AnimationAction>,
    frame_delta: f32,
}

impl AnimationMixer {
    pub fn new(clips: Vec<AnimationClip>, bindings: HashMap<usize, NodeId>, frame_delta: f32) -> Self {
        Self {
            clips,
            bindings,
            actions: Vec::new(),
            frame_delta,
        }
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn actions(&self) -> &[AnimationAction] {
        &self.actions
    }

    pub fn is_playing(&self) -> bool {
        self.actions.iter().any(|a| a.playing)
    }

    /// Start every clip, looping forever. Returns how many actions are playing.
    pub fn play_all(&mut self) -> usize {
        self.actions = (0..self.clips.len())
            .map(|clip| AnimationAction {
                clip,
                time: 0.0,
                playing: true,
                looping: true,
            })
            .collect();
        debug!(clips = self.actions.len(), "Playing all animation clips");
        self.actions.len()
    }

    /// Advance by the configured per-frame delta
    pub fn advance(&mut self) {
        self.advance_by(self.frame_delta);
    }

    pub fn advance_by(&mut self, delta: f32) {
        for action in self.actions.iter_mut().filter(|a| a.playing) {
            let duration = self.clips[action.clip].duration;
            if duration <= 0.0 {
                action.time = 0.0;
                continue;
            }
            let next = action.time + delta;
            action.time = if action.looping {
                next.rem_euclid(duration)
            } else if next >= duration {
                action.playing = false;
                duration
            } else {
                next
            };
        }
    }

    /// Write sampled values into node transforms. Returns the number of channels applied.
    pub fn apply(&self, graph: &mut SceneGraph) -> usize {
        let mut applied = 0;
        for action in self.actions.iter().filter(|a| a.playing) {
            for channel in &self.clips[action.clip].channels {
                let Some(node_id) = self.bindings.get(&channel.target) else {
                    continue;
                };
                let Some(node) = graph.get_mut(*node_id) else {
                    continue;
                };
                let transform = &mut node.transform;
                match channel.property {
                    ChannelProperty::Translation => {
                        if let Some(v) = channel.sample_vec3(action.time) {
                            transform.translation = v;
                            applied += 1;
                        }
                    }
                    ChannelProperty::Scale => {
                        if let Some(v) = channel.sample_vec3(action.time) {
                            transform.scale = v;
                            applied += 1;
                        }
                    }
                    ChannelProperty::Rotation => {
                        if let Some(q) = channel.sample_quat(action.time) {
                            transform.rotation = q;
                            applied += 1;
                        }
                    }
                }
            }
        }
        trace!(applied, "Applied animation channels");
        applied
    }

    /// Stop every action. Returns how many were playing.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for action in &mut self.actions {
            if action.playing {
                action.playing = false;
                stopped += 1;
            }
        }
        stopped
    }
}

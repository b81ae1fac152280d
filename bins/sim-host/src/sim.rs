// Toy environment driven over the channel: a damped point mass on a line.
// The learner sees [position, velocity] and answers with a push in {-1, 0, 1}.

const DT: f32 = 0.05;
const DAMPING: f32 = 0.98;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMass {
    pub position: f32,
    pub velocity: f32,
}

impl PointMass {
    pub fn new(position: f32) -> Self {
        Self {
            position,
            velocity: 0.0,
        }
    }

    pub fn observe(&self) -> Vec<f32> {
        vec![self.position, self.velocity]
    }

    /// Advance one tick. Out-of-range actions are clamped.
    pub fn step(&mut self, action: i32) {
        let force = action.clamp(-1, 1) as f32;
        self.velocity = (self.velocity + force * DT) * DAMPING;
        self.position += self.velocity * DT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_moves_in_its_direction() {
        let mut right = PointMass::new(0.0);
        right.step(1);
        assert!(right.velocity > 0.0);
        assert!(right.position > 0.0);

        let mut left = PointMass::new(0.0);
        left.step(-1);
        assert!(left.position < 0.0);
    }

    #[test]
    fn actions_are_clamped() {
        let mut a = PointMass::new(0.0);
        let mut b = PointMass::new(0.0);
        a.step(1);
        b.step(50);
        assert_eq!(a, b);
    }

    #[test]
    fn coasting_decays() {
        let mut p = PointMass::new(0.0);
        p.step(1);
        let v = p.velocity;
        p.step(0);
        assert!(p.velocity < v);
    }
}

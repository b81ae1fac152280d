// Bang-bang controller: push against a blend of position and velocity,
// coasting inside a small deadband around the origin.

const VELOCITY_GAIN: f32 = 1.5;
const DEADBAND: f32 = 0.05;

pub fn act(observation: &[f32]) -> Option<i32> {
    let [position, velocity] = observation else {
        return None;
    };
    let drive = -(position + VELOCITY_GAIN * velocity);
    let action = if drive > DEADBAND {
        1
    } else if drive < -DEADBAND {
        -1
    } else {
        0
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_back_toward_origin() {
        assert_eq!(act(&[2.0, 0.0]), Some(-1));
        assert_eq!(act(&[-2.0, 0.0]), Some(1));
    }

    #[test]
    fn brakes_when_overshooting() {
        // Left of the origin but racing right: brake.
        assert_eq!(act(&[-0.1, 1.0]), Some(-1));
    }

    #[test]
    fn coasts_near_rest() {
        assert_eq!(act(&[0.01, 0.0]), Some(0));
    }

    #[test]
    fn rejects_wrong_shape() {
        assert_eq!(act(&[]), None);
        assert_eq!(act(&[1.0, 2.0, 3.0]), None);
    }
}

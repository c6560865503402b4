use std::f64::consts::PI;

/// lin_interp returns the linearly interpolated value at x for given discrete data points xp, fp.
/// xp must be increasing and of the same length as fp. Values outside of xp are clamped to the
/// first/last entry of fp. Inspired by numpy.interp.
pub fn lin_interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return 0.0;
    }

    if x <= xp[0] {
        return fp[0];
    }

    for i in 1..n {
        if x <= xp[i] {
            let dx = xp[i] - xp[i - 1];
            if dx <= 0.0 {
                return fp[i];
            }
            return fp[i - 1] + (x - xp[i - 1]) * (fp[i] - fp[i - 1]) / dx;
        }
    }

    fp[n - 1]
}

/// wrap_angle maps an angle (rad) into ]-pi, pi].
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// wrap_distance maps a signed distance on a closed loop of length `period` into
/// ]-period/2, period/2].
pub fn wrap_distance(dist: f64, period: f64) -> f64 {
    if period <= 0.0 {
        return dist;
    }
    let mut d = dist % period;
    if d <= -0.5 * period {
        d += period;
    } else if d > 0.5 * period {
        d -= period;
    }
    d
}

/// wrap_position maps a position on a closed loop of length `period` into [0, period[.
pub fn wrap_position(s: f64, period: f64) -> f64 {
    if period <= 0.0 {
        return s;
    }
    let w = s.rem_euclid(period);
    // rem_euclid may return period for tiny negative inputs due to rounding
    if w >= period {
        0.0
    } else {
        w
    }
}

/// smoothstep returns a C1-continuous blend factor in [0, 1] for x between edge0 and edge1.
pub fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lin_interp_clamps_and_interpolates() {
        let xp = [0.0, 10.0, 20.0];
        let fp = [1.0, 3.0, 2.0];
        assert_relative_eq!(lin_interp(-5.0, &xp, &fp), 1.0);
        assert_relative_eq!(lin_interp(5.0, &xp, &fp), 2.0);
        assert_relative_eq!(lin_interp(15.0, &xp, &fp), 2.5);
        assert_relative_eq!(lin_interp(25.0, &xp, &fp), 2.0);
    }

    #[test]
    fn wrap_angle_stays_in_range() {
        assert_relative_eq!(wrap_angle(1.5 * PI), -0.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-0.5 * PI), -0.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(2.5 * PI), 0.5 * PI, epsilon = 1e-12);
    }

    #[test]
    fn wrap_distance_takes_short_way_around() {
        assert_relative_eq!(wrap_distance(90.0, 100.0), -10.0);
        assert_relative_eq!(wrap_distance(-90.0, 100.0), 10.0);
        assert_relative_eq!(wrap_distance(30.0, 100.0), 30.0);
    }

    #[test]
    fn wrap_position_handles_negative_input() {
        assert_relative_eq!(wrap_position(-10.0, 100.0), 90.0);
        assert_relative_eq!(wrap_position(250.0, 100.0), 50.0);
    }

    #[test]
    fn smoothstep_edges() {
        assert_relative_eq!(smoothstep(4.0, 8.0, 2.0), 0.0);
        assert_relative_eq!(smoothstep(4.0, 8.0, 6.0), 0.5);
        assert_relative_eq!(smoothstep(4.0, 8.0, 9.0), 1.0);
    }
}

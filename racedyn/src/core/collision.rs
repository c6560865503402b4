use glam::DVec2;

/// Share of the penetration removed by the position correction in one tick.
const POSITION_CORRECTION: f64 = 0.8;
/// (m) Penetration tolerated without correction.
const PENETRATION_SLOP: f64 = 0.01;

/// Collision view of a car: a circle moving in the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionBody {
    pub position: DVec2,
    pub velocity: DVec2,
    pub mass: f64,
    pub radius: f64,
}

/// Overlap of two bodies. The normal points from A to B.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub normal: DVec2,
    pub depth: f64,
}

/// Instantaneous changes resulting from a resolved contact.
/// * `dv_a`, `dv_b` - (m/s) Velocity changes
/// * `dp_a`, `dp_b` - (m) Position corrections
/// * `impact_speed` - (m/s) Closing speed along the normal before the impulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactResponse {
    pub dv_a: DVec2,
    pub dv_b: DVec2,
    pub dp_a: DVec2,
    pub dp_b: DVec2,
    pub impact_speed: f64,
}

/// contact_circle_circle returns the contact of two overlapping circles.
pub fn contact_circle_circle(a: &CollisionBody, b: &CollisionBody) -> Option<Contact> {
    let d = b.position - a.position;
    let r_sum = a.radius + b.radius;
    let dist2 = d.length_squared();
    if !(dist2 < r_sum * r_sum) {
        return None;
    }
    let dist = dist2.sqrt();
    let normal = if dist > 1e-6 { d / dist } else { DVec2::X };
    Some(Contact {
        normal,
        depth: r_sum - dist,
    })
}

/// resolve_contact computes the impulse exchange of two bodies in contact. The normal impulse uses
/// the coefficient of restitution, the tangential impulse is limited by Coulomb friction. Both
/// impulses are equal and opposite, i.e. the linear momentum is conserved. Separating bodies only
/// get the position correction.
pub fn resolve_contact(
    a: &CollisionBody,
    b: &CollisionBody,
    contact: &Contact,
    restitution: f64,
    friction: f64,
) -> ContactResponse {
    let inv_a = inv_mass(a.mass);
    let inv_b = inv_mass(b.mass);
    let inv_sum = inv_a + inv_b;

    let mut response = ContactResponse {
        dv_a: DVec2::ZERO,
        dv_b: DVec2::ZERO,
        dp_a: DVec2::ZERO,
        dp_b: DVec2::ZERO,
        impact_speed: 0.0,
    };
    if inv_sum <= 0.0 {
        return response;
    }

    // position correction split by inverse mass
    let correction = (contact.depth - PENETRATION_SLOP).max(0.0) * POSITION_CORRECTION / inv_sum;
    response.dp_a = -contact.normal * correction * inv_a;
    response.dp_b = contact.normal * correction * inv_b;

    let v_rel = b.velocity - a.velocity;
    let v_n = v_rel.dot(contact.normal);
    if v_n >= 0.0 {
        return response;
    }
    response.impact_speed = -v_n;

    let j_n = -(1.0 + restitution.clamp(0.0, 1.0)) * v_n / inv_sum;
    let tangent_vel = v_rel - contact.normal * v_n;
    let v_t = tangent_vel.length();
    let impulse = if v_t > 1e-9 {
        let tangent = tangent_vel / v_t;
        let j_t = (v_t / inv_sum).min(friction.max(0.0) * j_n);
        contact.normal * j_n - tangent * j_t
    } else {
        contact.normal * j_n
    };

    response.dv_a = -impulse * inv_a;
    response.dv_b = impulse * inv_b;
    response
}

/// resolve_wall_contact returns velocity change and position correction of a body touching a
/// static wall. The normal points out of the track, into the wall.
pub fn resolve_wall_contact(
    velocity: DVec2,
    normal: DVec2,
    penetration: f64,
    restitution: f64,
    friction: f64,
) -> ContactResponse {
    let mut response = ContactResponse {
        dv_a: DVec2::ZERO,
        dv_b: DVec2::ZERO,
        dp_a: -normal * penetration.max(0.0),
        dp_b: DVec2::ZERO,
        impact_speed: 0.0,
    };

    let v_n = velocity.dot(normal);
    if v_n <= 0.0 {
        return response;
    }
    response.impact_speed = v_n;

    let dv_n = -(1.0 + restitution.clamp(0.0, 1.0)) * v_n;
    let tangent_vel = velocity - normal * v_n;
    let v_t = tangent_vel.length();
    let dv_t = if v_t > 1e-9 {
        -tangent_vel / v_t * v_t.min(friction.max(0.0) * dv_n.abs())
    } else {
        DVec2::ZERO
    };
    response.dv_a = normal * dv_n + dv_t;
    response
}

fn inv_mass(mass: f64) -> f64 {
    if mass > 0.0 && mass.is_finite() {
        1.0 / mass
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn body(x: f64, vx: f64, vy: f64, mass: f64) -> CollisionBody {
        CollisionBody {
            position: DVec2::new(x, 0.0),
            velocity: DVec2::new(vx, vy),
            mass,
            radius: 1.2,
        }
    }

    #[test]
    fn elastic_impulse_conserves_momentum() {
        let a = body(0.0, 20.0, 1.0, 700.0);
        let b = body(2.0, 10.0, -2.0, 760.0);
        let contact = contact_circle_circle(&a, &b).expect("overlap");
        let response = resolve_contact(&a, &b, &contact, 1.0, 0.3);

        let p_before = a.velocity * a.mass + b.velocity * b.mass;
        let p_after = (a.velocity + response.dv_a) * a.mass + (b.velocity + response.dv_b) * b.mass;
        assert_relative_eq!(p_before.x, p_after.x, epsilon = 1e-9);
        assert_relative_eq!(p_before.y, p_after.y, epsilon = 1e-9);

        // fully elastic: the normal relative velocity is reversed
        let v_n_before = (b.velocity - a.velocity).dot(contact.normal);
        let v_n_after = (b.velocity + response.dv_b - a.velocity - response.dv_a).dot(contact.normal);
        assert_relative_eq!(v_n_after, -v_n_before, epsilon = 1e-9);
        assert_relative_eq!(response.impact_speed, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn separating_bodies_are_only_pushed_apart() {
        let a = body(0.0, 5.0, 0.0, 700.0);
        let b = body(2.0, 10.0, 0.0, 700.0);
        let contact = contact_circle_circle(&a, &b).expect("overlap");
        let response = resolve_contact(&a, &b, &contact, 0.5, 0.3);
        assert_eq!(response.dv_a, DVec2::ZERO);
        assert!(response.dp_a.x < 0.0 && response.dp_b.x > 0.0);
        assert_relative_eq!(response.dp_a.x, -response.dp_b.x, epsilon = 1e-12);
    }

    #[test]
    fn distant_bodies_do_not_touch() {
        assert!(contact_circle_circle(&body(0.0, 0.0, 0.0, 700.0), &body(2.5, 0.0, 0.0, 700.0)).is_none());
    }

    #[test]
    fn wall_bounce_removes_inward_velocity() {
        let response = resolve_wall_contact(DVec2::new(30.0, -5.0), DVec2::new(0.0, -1.0), 0.4, 0.3, 0.0);
        assert_relative_eq!(response.dv_a.y, 6.5, epsilon = 1e-12);
        assert_relative_eq!(response.dv_a.x, 0.0);
        assert_relative_eq!(response.dp_a.y, 0.4);
        assert_relative_eq!(response.impact_speed, 5.0);
    }
}

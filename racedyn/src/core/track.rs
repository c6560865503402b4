use crate::core::error::{ConfigurationError, SimulationWarning};
use glam::DVec2;
use helpers::general::wrap_position;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Positions further away from the path than this are treated as lookup misses.
pub const MAX_PATH_DISTANCE: f64 = 150.0;

/// Number of segments searched around a lookup hint before falling back to a full scan.
const HINT_WINDOW_BACK: usize = 10;
const HINT_WINDOW_FRONT: usize = 40;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceType {
    Track,
    Kerb,
    PitLane,
    Grass,
    Gravel,
    Wall,
}

impl Default for SurfaceType {
    fn default() -> Self {
        SurfaceType::Grass
    }
}

impl SurfaceType {
    /// grip_multiplier returns the friction scaling of the surface.
    pub fn grip_multiplier(&self) -> f64 {
        match self {
            SurfaceType::Track => 1.0,
            SurfaceType::Kerb => 0.85,
            SurfaceType::PitLane => 0.95,
            SurfaceType::Grass => 0.3,
            SurfaceType::Gravel => 0.2,
            SurfaceType::Wall => 0.0,
        }
    }

    /// rolling_resistance returns the rolling resistance coefficient of the surface.
    pub fn rolling_resistance(&self) -> f64 {
        match self {
            SurfaceType::Track => 0.015,
            SurfaceType::Kerb => 0.02,
            SurfaceType::PitLane => 0.015,
            SurfaceType::Grass => 0.08,
            SurfaceType::Gravel => 0.15,
            SurfaceType::Wall => 0.3,
        }
    }

    pub fn is_off_track(&self) -> bool {
        matches!(self, SurfaceType::Grass | SurfaceType::Gravel | SurfaceType::Wall)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    Dry,
    LightRain,
    HeavyRain,
}

impl Default for Weather {
    fn default() -> Self {
        Weather::Dry
    }
}

impl Weather {
    pub fn grip_multiplier(&self) -> f64 {
        match self {
            Weather::Dry => 1.0,
            Weather::LightRain => 0.8,
            Weather::HeavyRain => 0.6,
        }
    }

    pub fn is_wet(&self) -> bool {
        !matches!(self, Weather::Dry)
    }
}

/// * `s_start` - (m) Start of the zone
/// * `s_end` - (m) End of the zone (may be smaller than s_start if the zone wraps the finish line)
/// * `surface` - Surface inside the track limits within the zone
#[derive(Debug, Deserialize, Clone)]
pub struct SurfaceZone {
    pub s_start: f64,
    pub s_end: f64,
    pub surface: SurfaceType,
}

/// * `entry_s` - (m) Pit lane entry
/// * `exit_s` - (m) Pit lane exit
/// * `box_s` - (m) Location of the pit boxes
/// * `speed_limit` - (m/s) Pit lane speed limit
/// * `lateral_offset` - (m) Offset of the pit lane center from the track center (+ left)
/// * `half_width` - (m) Half width of the pit lane
#[derive(Debug, Deserialize, Clone)]
pub struct PitLanePars {
    pub entry_s: f64,
    pub exit_s: f64,
    pub box_s: f64,
    pub speed_limit: f64,
    pub lateral_offset: f64,
    #[serde(default = "default_pit_half_width")]
    pub half_width: f64,
}

fn default_pit_half_width() -> f64 {
    3.0
}

/// * `name` - Track name (the centerline is read from input/tracks/<name>.csv)
/// * `s12` - (m) Boundary between sectors 1 and 2
/// * `s23` - (m) Boundary between sectors 2 and 3
/// * `d_first_gridpos` - (m) Distance between the first grid position and the finish line (can be
/// negative or positive)
/// * `d_per_gridpos` - (m) Distance between two grid positions (negative)
/// * `grid_lateral_offset` - (m) Lateral offset of the grid slots, alternating left/right
/// * `v_max` - (m/s) Upper limit of the target speed profile
/// * `a_lat_max` - (m/s^2) Lateral acceleration used for the corner speeds
/// * `a_brake_max` - (m/s^2) Deceleration used for the braking zones
/// * `a_accel_max` - (m/s^2) Acceleration used for corner exits
/// * `kerb_width` - (m) Width of the kerbs next to the track limits
/// * `runoff_width` - (m) Width of the run-off area behind the kerbs (walls beyond)
/// * `runoff_surface` - Surface of the run-off area
/// * `surface_zones` - Zones with a different surface inside the track limits
/// * `pit_lane` - Pit lane, if the track has one
#[derive(Debug, Deserialize, Clone)]
pub struct TrackPars {
    pub name: String,
    pub s12: f64,
    pub s23: f64,
    pub d_first_gridpos: f64,
    pub d_per_gridpos: f64,
    #[serde(default = "default_grid_lateral_offset")]
    pub grid_lateral_offset: f64,
    pub v_max: f64,
    pub a_lat_max: f64,
    pub a_brake_max: f64,
    pub a_accel_max: f64,
    #[serde(default = "default_kerb_width")]
    pub kerb_width: f64,
    #[serde(default = "default_runoff_width")]
    pub runoff_width: f64,
    #[serde(default)]
    pub runoff_surface: SurfaceType,
    #[serde(default)]
    pub surface_zones: Vec<SurfaceZone>,
    #[serde(default)]
    pub pit_lane: Option<PitLanePars>,
}

fn default_grid_lateral_offset() -> f64 {
    2.0
}

fn default_kerb_width() -> f64 {
    1.0
}

fn default_runoff_width() -> f64 {
    10.0
}

/// One row of the centerline CSV file.
#[derive(Debug, Deserialize, Clone)]
pub struct CsvTrackEl {
    pub x_m: f64,
    pub y_m: f64,
    pub w_tr_left_m: f64,
    pub w_tr_right_m: f64,
}

#[derive(Debug, Clone)]
pub struct Waypoint {
    pub position: DVec2,
    pub s: f64,
    pub heading: f64,
    pub curvature: f64,
    pub target_speed: f64,
    pub w_left: f64,
    pub w_right: f64,
    pub surface: SurfaceType,
}

#[derive(Debug, Clone)]
pub struct PitLane {
    pub entry_s: f64,
    pub exit_s: f64,
    pub box_s: f64,
    pub speed_limit: f64,
    pub lateral_offset: f64,
    pub half_width: f64,
}

/// Projection of a world position onto the track path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackLocation {
    pub segment: usize,
    pub s: f64,
    pub lateral_offset: f64,
    pub heading: f64,
    pub w_left: f64,
    pub w_right: f64,
    pub distance: f64,
}

impl TrackLocation {
    /// is_within_limits returns true if the position lies between the track limits.
    pub fn is_within_limits(&self) -> bool {
        self.lateral_offset <= self.w_left && self.lateral_offset >= -self.w_right
    }

    /// excess returns how far (m) the position lies outside the track limits (0 inside).
    pub fn excess(&self) -> f64 {
        (self.lateral_offset - self.w_left)
            .max(-self.w_right - self.lateral_offset)
            .max(0.0)
    }
}

/// Immutable closed-loop path with everything the drivers and the session need to know about
/// the circuit.
#[derive(Debug, Clone)]
pub struct TrackPath {
    pub name: String,
    pub length: f64,
    pub s12: f64,
    pub s23: f64,
    pub d_first_gridpos: f64,
    pub d_per_gridpos: f64,
    pub grid_lateral_offset: f64,
    pub kerb_width: f64,
    pub runoff_width: f64,
    pub runoff_surface: SurfaceType,
    waypoints: Vec<Waypoint>,
    pit_lane: Option<PitLane>,
}

impl TrackPath {
    pub fn new(track_pars: &TrackPars, centerline: &[CsvTrackEl]) -> Result<TrackPath, ConfigurationError> {
        let err = |reason: String| ConfigurationError::InvalidTrack {
            name: track_pars.name.to_owned(),
            reason,
        };

        // drop repeated points and a closing point equal to the first one
        let mut pts: Vec<&CsvTrackEl> = Vec::with_capacity(centerline.len());
        for el in centerline.iter() {
            if !(el.x_m.is_finite() && el.y_m.is_finite()) {
                return Err(err("centerline contains non-finite coordinates".to_owned()));
            }
            if !(el.w_tr_left_m > 0.0 && el.w_tr_right_m > 0.0) {
                return Err(err("track widths must be positive".to_owned()));
            }
            if let Some(last) = pts.last() {
                if (last.x_m - el.x_m).hypot(last.y_m - el.y_m) < 1e-6 {
                    continue;
                }
            }
            pts.push(el);
        }
        if pts.len() > 1 {
            let (first, last) = (pts[0], pts[pts.len() - 1]);
            if (last.x_m - first.x_m).hypot(last.y_m - first.y_m) < 1e-6 {
                pts.pop();
            }
        }
        let n = pts.len();
        if n < 3 {
            return Err(err("centerline requires at least three distinct points".to_owned()));
        }

        for (value, label) in [
            (track_pars.v_max, "v_max"),
            (track_pars.a_lat_max, "a_lat_max"),
            (track_pars.a_brake_max, "a_brake_max"),
            (track_pars.a_accel_max, "a_accel_max"),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(err(format!("{} must be positive", label)));
            }
        }
        if !(track_pars.kerb_width >= 0.0 && track_pars.runoff_width >= 0.0) {
            return Err(err("kerb and run-off widths must not be negative".to_owned()));
        }

        let positions: Vec<DVec2> = pts.iter().map(|el| DVec2::new(el.x_m, el.y_m)).collect();

        // distances and segment headings
        let mut seg_len = vec![0.0; n];
        let mut seg_heading = vec![0.0; n];
        for i in 0..n {
            let d = positions[(i + 1) % n] - positions[i];
            seg_len[i] = d.length();
            seg_heading[i] = d.y.atan2(d.x);
        }
        let length: f64 = seg_len.iter().sum();

        let mut s = vec![0.0; n];
        for i in 1..n {
            s[i] = s[i - 1] + seg_len[i - 1];
        }

        // signed curvature from the heading change between neighboring segments
        let mut curvature = vec![0.0; n];
        for i in 0..n {
            let prev = positions[i] - positions[(i + n - 1) % n];
            let next = positions[(i + 1) % n] - positions[i];
            let theta = prev.perp_dot(next).atan2(prev.dot(next));
            let ds = 0.5 * (seg_len[(i + n - 1) % n] + seg_len[i]);
            if ds > 0.0 {
                curvature[i] = theta / ds;
            }
        }

        let target_speed = calc_speed_profile(&curvature, &seg_len, track_pars);

        let mut waypoints: Vec<Waypoint> = (0..n)
            .map(|i| Waypoint {
                position: positions[i],
                s: s[i],
                heading: seg_heading[i],
                curvature: curvature[i],
                target_speed: target_speed[i],
                w_left: pts[i].w_tr_left_m,
                w_right: pts[i].w_tr_right_m,
                surface: SurfaceType::Track,
            })
            .collect();

        for zone in track_pars.surface_zones.iter() {
            for wp in waypoints.iter_mut() {
                if in_zone(wp.s, zone.s_start, zone.s_end) {
                    wp.surface = zone.surface;
                }
            }
        }

        if !(0.0 < track_pars.s12 && track_pars.s12 < track_pars.s23 && track_pars.s23 < length) {
            return Err(err(format!(
                "sector boundaries must satisfy 0 < s12 < s23 < length ({:.1}m)",
                length
            )));
        }

        let pit_lane = match &track_pars.pit_lane {
            Some(pars) => {
                for (value, label) in [
                    (pars.entry_s, "pit entry"),
                    (pars.exit_s, "pit exit"),
                    (pars.box_s, "pit box"),
                ] {
                    if !(0.0..length).contains(&value) {
                        return Err(err(format!("{} must be inside [0, length[", label)));
                    }
                }
                if !in_zone(pars.box_s, pars.entry_s, pars.exit_s) {
                    return Err(err("pit box must lie between pit entry and exit".to_owned()));
                }
                if !(pars.speed_limit > 0.0 && pars.half_width > 0.0) {
                    return Err(err("pit speed limit and width must be positive".to_owned()));
                }
                Some(PitLane {
                    entry_s: pars.entry_s,
                    exit_s: pars.exit_s,
                    box_s: pars.box_s,
                    speed_limit: pars.speed_limit,
                    lateral_offset: pars.lateral_offset,
                    half_width: pars.half_width,
                })
            }
            None => None,
        };

        Ok(TrackPath {
            name: track_pars.name.to_owned(),
            length,
            s12: track_pars.s12,
            s23: track_pars.s23,
            d_first_gridpos: track_pars.d_first_gridpos,
            d_per_gridpos: track_pars.d_per_gridpos,
            grid_lateral_offset: track_pars.grid_lateral_offset,
            kerb_width: track_pars.kerb_width,
            runoff_width: track_pars.runoff_width,
            runoff_surface: track_pars.runoff_surface,
            waypoints,
            pit_lane,
        })
    }

    // ---------------------------------------------------------------------------------------------
    // QUERIES -------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn pit_lane(&self) -> Option<&PitLane> {
        self.pit_lane.as_ref()
    }

    /// locate projects a world position onto the path. A segment index hint (e.g. the result of
    /// the previous tick) restricts the search to a window around it.
    pub fn locate(&self, pos: DVec2, hint: Option<usize>) -> Result<TrackLocation, SimulationWarning> {
        if !pos.is_finite() {
            return Err(SimulationWarning::NonFinite("position"));
        }
        let n = self.waypoints.len();

        let mut best = match hint {
            Some(h) if h < n => {
                let start = h + n - HINT_WINDOW_BACK.min(n);
                let count = (HINT_WINDOW_BACK + HINT_WINDOW_FRONT).min(n);
                self.closest_segment(pos, (0..count).map(|k| (start + k) % n))
            }
            _ => self.closest_segment(pos, 0..n),
        };

        let max_halfwidth = self.kerb_width + self.runoff_width + 20.0;
        if hint.is_some() && best.1 > max_halfwidth {
            best = self.closest_segment(pos, 0..n);
        }

        let (segment, distance) = best;
        if distance > MAX_PATH_DISTANCE {
            return Err(SimulationWarning::PathLookupMiss { distance });
        }

        let wp = &self.waypoints[segment];
        let wp_next = &self.waypoints[(segment + 1) % n];
        let d = wp_next.position - wp.position;
        let seg_len = d.length();
        let t = ((pos - wp.position).dot(d) / (seg_len * seg_len)).clamp(0.0, 1.0);
        let lateral_offset = d.perp_dot(pos - wp.position) / seg_len;

        Ok(TrackLocation {
            segment,
            s: wrap_position(wp.s + t * seg_len, self.length),
            lateral_offset,
            heading: wp.heading,
            w_left: wp.w_left + t * (wp_next.w_left - wp.w_left),
            w_right: wp.w_right + t * (wp_next.w_right - wp.w_right),
            distance,
        })
    }

    fn closest_segment<I: Iterator<Item = usize>>(&self, pos: DVec2, segments: I) -> (usize, f64) {
        let n = self.waypoints.len();
        let mut best = (0, f64::INFINITY);

        for i in segments {
            let a = self.waypoints[i].position;
            let b = self.waypoints[(i + 1) % n].position;
            let d = b - a;
            let t = ((pos - a).dot(d) / d.length_squared()).clamp(0.0, 1.0);
            let dist = (a + d * t).distance(pos);
            if dist < best.1 {
                best = (i, dist);
            }
        }

        best
    }

    /// segment_index returns the index of the segment containing the track coordinate s.
    pub fn segment_index(&self, s: f64) -> usize {
        let s = wrap_position(s, self.length);
        let idx = self.waypoints.partition_point(|wp| wp.s <= s);
        idx.saturating_sub(1)
    }

    fn segment_length(&self, i: usize) -> f64 {
        let n = self.waypoints.len();
        if i + 1 < n {
            self.waypoints[i + 1].s - self.waypoints[i].s
        } else {
            self.length - self.waypoints[n - 1].s
        }
    }

    /// point_at returns the world position at track coordinate s and lateral offset (+ left).
    pub fn point_at(&self, s: f64, lateral_offset: f64) -> DVec2 {
        let n = self.waypoints.len();
        let s = wrap_position(s, self.length);
        let i = self.segment_index(s);
        let a = self.waypoints[i].position;
        let b = self.waypoints[(i + 1) % n].position;
        let len = self.segment_length(i).max(f64::EPSILON);
        let t = ((s - self.waypoints[i].s) / len).clamp(0.0, 1.0);
        let dir = (b - a).normalize_or_zero();
        a.lerp(b, t) + dir.perp() * lateral_offset
    }

    /// heading_at returns the path heading (rad) at track coordinate s.
    pub fn heading_at(&self, s: f64) -> f64 {
        self.waypoints[self.segment_index(s)].heading
    }

    /// target_speed_at returns the interpolated target speed (m/s) at track coordinate s.
    pub fn target_speed_at(&self, s: f64) -> f64 {
        let n = self.waypoints.len();
        let s = wrap_position(s, self.length);
        let i = self.segment_index(s);
        let len = self.segment_length(i).max(f64::EPSILON);
        let t = ((s - self.waypoints[i].s) / len).clamp(0.0, 1.0);
        let v0 = self.waypoints[i].target_speed;
        let v1 = self.waypoints[(i + 1) % n].target_speed;
        v0 + t * (v1 - v0)
    }

    /// min_target_speed returns the lowest target speed within [s, s + preview].
    pub fn min_target_speed(&self, s: f64, preview: f64) -> f64 {
        let n = self.waypoints.len();
        let s = wrap_position(s, self.length);
        let i = self.segment_index(s);
        let mut v_min = self.target_speed_at(s);
        let mut covered = self.segment_length(i) - (s - self.waypoints[i].s);
        let mut j = (i + 1) % n;

        for _ in 0..n {
            if covered > preview {
                break;
            }
            v_min = v_min.min(self.waypoints[j].target_speed);
            covered += self.segment_length(j);
            j = (j + 1) % n;
        }

        v_min
    }

    /// surface_at returns the surface type at a located position.
    pub fn surface_at(&self, loc: &TrackLocation) -> SurfaceType {
        if loc.is_within_limits() {
            return self.waypoints[loc.segment].surface;
        }
        if self.in_pit_corridor(loc) {
            return SurfaceType::PitLane;
        }

        let excess = loc.excess();
        if excess <= self.kerb_width {
            SurfaceType::Kerb
        } else if excess <= self.kerb_width + self.runoff_width {
            self.runoff_surface
        } else {
            SurfaceType::Wall
        }
    }

    /// wall_contact returns the outward wall normal and the penetration depth (m) if the located
    /// position lies behind the barrier.
    pub fn wall_contact(&self, loc: &TrackLocation) -> Option<(DVec2, f64)> {
        let limit = self.kerb_width + self.runoff_width;
        let (left_limit, right_limit) = match &self.pit_lane {
            Some(pit) if in_zone(loc.s, pit.entry_s, pit.exit_s) => {
                let pit_outer = pit.lateral_offset.abs() + pit.half_width;
                if pit.lateral_offset >= 0.0 {
                    ((loc.w_left + limit).max(pit_outer), loc.w_right + limit)
                } else {
                    (loc.w_left + limit, (loc.w_right + limit).max(pit_outer))
                }
            }
            _ => (loc.w_left + limit, loc.w_right + limit),
        };

        let left_normal = DVec2::from_angle(loc.heading).perp();
        if loc.lateral_offset > left_limit {
            Some((left_normal, loc.lateral_offset - left_limit))
        } else if loc.lateral_offset < -right_limit {
            Some((-left_normal, -right_limit - loc.lateral_offset))
        } else {
            None
        }
    }

    /// in_pit_zone returns true if the track coordinate lies between pit entry and exit.
    pub fn in_pit_zone(&self, s: f64) -> bool {
        match &self.pit_lane {
            Some(pit) => in_zone(s, pit.entry_s, pit.exit_s),
            None => false,
        }
    }

    fn in_pit_corridor(&self, loc: &TrackLocation) -> bool {
        match &self.pit_lane {
            Some(pit) if in_zone(loc.s, pit.entry_s, pit.exit_s) => {
                let same_side = pit.lateral_offset * loc.lateral_offset > 0.0;
                same_side && loc.lateral_offset.abs() <= pit.lateral_offset.abs() + pit.half_width
            }
            _ => false,
        }
    }

    /// grid_slot returns track coordinate and lateral offset of a (1-based) grid position.
    pub fn grid_slot(&self, p_grid: u32) -> (f64, f64) {
        let k = p_grid.max(1) - 1;
        let s = wrap_position(self.d_first_gridpos + k as f64 * self.d_per_gridpos, self.length);
        let lateral = if k % 2 == 0 {
            self.grid_lateral_offset
        } else {
            -self.grid_lateral_offset
        };
        (s, lateral)
    }

    /// forward_distance returns the distance (m) driven from s_from to s_to along the loop.
    pub fn forward_distance(&self, s_from: f64, s_to: f64) -> f64 {
        wrap_position(s_to - s_from, self.length)
    }
}

/// in_zone checks if s lies in [start, end], where the zone may wrap the finish line.
pub fn in_zone(s: f64, start: f64, end: f64) -> bool {
    if start <= end {
        s >= start && s <= end
    } else {
        s >= start || s <= end
    }
}

/// calc_speed_profile returns the curvature-limited target speed per waypoint, smoothed by the
/// braking and acceleration limits around the closed loop.
fn calc_speed_profile(curvature: &[f64], seg_len: &[f64], track_pars: &TrackPars) -> Vec<f64> {
    let n = curvature.len();
    let mut v: Vec<f64> = curvature
        .iter()
        .map(|kappa| {
            if kappa.abs() > 1e-9 {
                (track_pars.a_lat_max / kappa.abs()).sqrt().min(track_pars.v_max)
            } else {
                track_pars.v_max
            }
        })
        .collect();

    // two rounds each so the limits propagate across the finish line
    for _ in 0..2 {
        for i in (0..n).rev() {
            let next = (i + 1) % n;
            let v_lim = (v[next] * v[next] + 2.0 * track_pars.a_brake_max * seg_len[i]).sqrt();
            v[i] = v[i].min(v_lim);
        }
    }
    for _ in 0..2 {
        for i in 0..n {
            let next = (i + 1) % n;
            let v_lim = (v[i] * v[i] + 2.0 * track_pars.a_accel_max * seg_len[i]).sqrt();
            v[next] = v[next].min(v_lim);
        }
    }

    v
}

/// generate_oval creates the centerline of an oval circuit running counter-clockwise: two straights
/// of length `straight` joined by half circles of `radius`. The first point lies in the middle of
/// the lower straight.
pub fn generate_oval(straight: f64, radius: f64, spacing: f64, half_width: f64) -> Vec<CsvTrackEl> {
    let spacing = spacing.max(0.5);
    let n_straight = (straight / spacing).ceil().max(1.0) as usize;
    let n_arc = (PI * radius / spacing).ceil().max(2.0) as usize;
    let mut pts: Vec<DVec2> = Vec::with_capacity(2 * (n_straight + n_arc));

    for i in 0..n_straight {
        pts.push(DVec2::new(straight * i as f64 / n_straight as f64, 0.0));
    }
    for j in 0..n_arc {
        let phi = -0.5 * PI + PI * j as f64 / n_arc as f64;
        pts.push(DVec2::new(straight, radius) + DVec2::from_angle(phi) * radius);
    }
    for i in 0..n_straight {
        pts.push(DVec2::new(straight * (1.0 - i as f64 / n_straight as f64), 2.0 * radius));
    }
    for j in 0..n_arc {
        let phi = 0.5 * PI + PI * j as f64 / n_arc as f64;
        pts.push(DVec2::new(0.0, radius) + DVec2::from_angle(phi) * radius);
    }
    pts.rotate_left(n_straight / 2);

    pts.iter()
        .map(|p| CsvTrackEl {
            x_m: p.x,
            y_m: p.y,
            w_tr_left_m: half_width,
            w_tr_right_m: half_width,
        })
        .collect()
}

/// oval_track_pars returns parameters matching generate_oval.
pub fn oval_track_pars(name: &str, straight: f64, radius: f64) -> TrackPars {
    let length = 2.0 * straight + 2.0 * PI * radius;
    TrackPars {
        name: name.to_owned(),
        s12: length / 3.0,
        s23: 2.0 * length / 3.0,
        d_first_gridpos: -10.0,
        d_per_gridpos: -8.0,
        grid_lateral_offset: 2.0,
        v_max: 75.0,
        a_lat_max: 11.0,
        a_brake_max: 9.0,
        a_accel_max: 8.0,
        kerb_width: 1.0,
        runoff_width: 10.0,
        runoff_surface: SurfaceType::Grass,
        surface_zones: Vec::new(),
        pit_lane: None,
    }
}

#[cfg(test)]
pub(crate) fn test_oval() -> TrackPath {
    let pars = oval_track_pars("TestOval", 400.0, 90.0);
    TrackPath::new(&pars, &generate_oval(400.0, 90.0, 5.0, 7.0)).expect("valid oval")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn oval_length_matches_geometry() {
        let track = test_oval();
        let expected = 800.0 + 2.0 * PI * 90.0;
        // chords are slightly shorter than the arcs
        assert_relative_eq!(track.length, expected, max_relative = 1e-3);
    }

    #[test]
    fn corners_are_slower_than_straights() {
        let track = test_oval();
        // the middle of the lower straight is limited by braking/acceleration only
        let v_straight = track.target_speed_at(5.0);
        let v_corner = track.target_speed_at(200.0 + 0.5 * PI * 90.0);
        assert!(v_straight > 60.0 && v_straight <= 75.0);
        assert!(v_corner < 35.0);
        assert!(track.min_target_speed(5.0, 400.0) < 35.0);
        assert!(track.waypoints().iter().all(|wp| wp.target_speed > 0.0));
    }

    #[test]
    fn locate_returns_signed_offset() {
        let track = test_oval();
        // counter-clockwise oval: the infield is on the left side of the lower straight
        let loc = track.locate(DVec2::new(250.0, 3.0), None).expect("on track");
        assert_relative_eq!(loc.lateral_offset, 3.0, epsilon = 1e-9);
        assert_relative_eq!(loc.s, 50.0, epsilon = 1e-6);
        assert!(loc.is_within_limits());

        let loc_hint = track.locate(DVec2::new(250.0, -4.0), Some(loc.segment)).expect("on track");
        assert_relative_eq!(loc_hint.lateral_offset, -4.0, epsilon = 1e-9);
    }

    #[test]
    fn locate_rejects_far_positions() {
        let track = test_oval();
        assert!(matches!(
            track.locate(DVec2::new(200.0, -1000.0), None),
            Err(SimulationWarning::PathLookupMiss { .. })
        ));
        assert!(track.locate(DVec2::new(f64::NAN, 0.0), None).is_err());
    }

    #[test]
    fn surfaces_beyond_track_limits() {
        let track = test_oval();
        let surface = |y: f64| {
            let loc = track.locate(DVec2::new(250.0, y), None).expect("near track");
            track.surface_at(&loc)
        };
        assert_eq!(surface(0.0), SurfaceType::Track);
        assert_eq!(surface(-7.5), SurfaceType::Kerb);
        assert_eq!(surface(-12.0), SurfaceType::Grass);
        assert_eq!(surface(-20.0), SurfaceType::Wall);

        let loc = track.locate(DVec2::new(250.0, -20.0), None).expect("near track");
        let (normal, depth) = track.wall_contact(&loc).expect("behind the wall");
        assert_relative_eq!(normal.y, -1.0, epsilon = 1e-9);
        assert_relative_eq!(depth, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn point_at_inverts_locate() {
        let track = test_oval();
        for s in [10.0, 333.3, 700.0, 1100.0] {
            let p = track.point_at(s, 1.5);
            let loc = track.locate(p, None).expect("on track");
            assert_relative_eq!(loc.s, s, epsilon = 1e-6);
            assert_relative_eq!(loc.lateral_offset, 1.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn grid_slots_are_behind_the_line() {
        let track = test_oval();
        let (s1, l1) = track.grid_slot(1);
        let (s2, l2) = track.grid_slot(2);
        assert_relative_eq!(s1, track.length - 10.0, epsilon = 1e-9);
        assert_relative_eq!(s2, track.length - 18.0, epsilon = 1e-9);
        assert!(l1 > 0.0 && l2 < 0.0);
    }

    #[test]
    fn rejects_degenerate_centerline() {
        let pars = oval_track_pars("Broken", 400.0, 90.0);
        let pts = generate_oval(400.0, 90.0, 5.0, 7.0);
        assert!(TrackPath::new(&pars, &pts[..2]).is_err());

        let mut narrow = pts.clone();
        narrow[3].w_tr_left_m = 0.0;
        assert!(TrackPath::new(&pars, &narrow).is_err());
    }
}

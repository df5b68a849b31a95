/// Physical monitor/animal geometry. Determines the field of view and
/// the per-pixel spherical coordinate maps; changing any of these fields
/// invalidates [`crate::StimulusGenerator`]'s precomputed invariants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorGeometry {
    pub width_px: u32,
    pub height_px: u32,
    pub width_cm: f64,
    pub height_cm: f64,
    pub distance_cm: f64,
    pub fps: u32,
}

impl MonitorGeometry {
    pub fn field_of_view_horizontal_deg(&self) -> f64 {
        2.0 * (self.width_cm / (2.0 * self.distance_cm)).atan().to_degrees()
    }

    pub fn field_of_view_vertical_deg(&self) -> f64 {
        2.0 * (self.height_cm / (2.0 * self.distance_cm)).atan().to_degrees()
    }

    fn pixels_per_degree_horizontal(&self) -> f64 {
        self.width_px as f64 / self.field_of_view_horizontal_deg()
    }

    fn pixels_per_degree_vertical(&self) -> f64 {
        self.height_px as f64 / self.field_of_view_vertical_deg()
    }

    /// Azimuth/altitude (degrees) for every pixel, in row-major order,
    /// following the Marshel et al. spherical-coordinate equations: the
    /// screen is treated as a plane at `distance_cm` in front of the
    /// animal, and each pixel's visual angle is computed from its
    /// physical offset from screen center.
    pub(crate) fn spherical_coordinate_maps(&self) -> (Vec<f32>, Vec<f32>) {
        let w = self.width_px as usize;
        let h = self.height_px as usize;
        let fov_h = self.field_of_view_horizontal_deg();
        let fov_v = self.field_of_view_vertical_deg();
        let ppd_h = self.pixels_per_degree_horizontal();
        let ppd_v = self.pixels_per_degree_vertical();
        let center_x = w as f64 / 2.0;
        let center_y = h as f64 / 2.0;
        let x0 = self.distance_cm;

        let mut azimuth = Vec::with_capacity(w * h);
        let mut altitude = Vec::with_capacity(w * h);

        for row in 0..h {
            let y_deg = (row as f64 - center_y) / ppd_v;
            let z_screen_cm = y_deg * (self.height_cm / fov_v);
            for col in 0..w {
                let x_deg = (col as f64 - center_x) / ppd_h;
                let y_screen_cm = x_deg * (self.width_cm / fov_h);

                let r = (x0 * x0 + y_screen_cm * y_screen_cm + z_screen_cm * z_screen_cm).sqrt();
                let az = (-y_screen_cm).atan2(x0);
                let alt = std::f64::consts::FRAC_PI_2 - (z_screen_cm / r).acos();

                azimuth.push(az.to_degrees() as f32);
                altitude.push(alt.to_degrees() as f32);
            }
        }

        (azimuth, altitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> MonitorGeometry {
        MonitorGeometry {
            width_px: 64,
            height_px: 48,
            width_cm: 33.6,
            height_cm: 25.2,
            distance_cm: 10.0,
            fps: 60,
        }
    }

    #[test]
    fn center_pixel_has_near_zero_azimuth_and_altitude() {
        let g = geom();
        let (az, alt) = g.spherical_coordinate_maps();
        let w = g.width_px as usize;
        let h = g.height_px as usize;
        let idx = (h / 2) * w + (w / 2);
        assert!(az[idx].abs() < 5.0);
        assert!(alt[idx].abs() < 5.0);
    }

    #[test]
    fn fov_increases_as_screen_widens() {
        let mut g = geom();
        let fov1 = g.field_of_view_horizontal_deg();
        g.width_cm *= 2.0;
        let fov2 = g.field_of_view_horizontal_deg();
        assert!(fov2 > fov1);
    }
}

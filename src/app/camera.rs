use ash::vk;
use glam::{Mat4, Vec3};

/// Fixed look-at camera over the demo scene.
pub struct Camera {
    eye: Vec3,
    target: Vec3,
    up: Vec3,
    fov_y_degrees: f32,
    z_near: f32,
    z_far: f32,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            eye: Vec3::new(2.0, 2.0, 2.0),
            target: Vec3::ZERO,
            up: Vec3::Z,
            fov_y_degrees: 45.0,
            z_near: 0.1,
            z_far: 10.0,
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Projection for the given presentation extent. Vulkan's clip-space
    /// Y points down, so the Y axis is flipped relative to glam's
    /// GL-style convention.
    pub fn projection(&self, extent: vk::Extent2D) -> Mat4 {
        let aspect = extent.width as f32 / extent.height as f32;
        let mut proj = Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            aspect,
            self.z_near,
            self.z_far,
        );
        proj.y_axis.y *= -1.0;
        proj
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_flips_y_for_vulkan_clip_space() {
        let proj = Camera::new().projection(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert!(proj.y_axis.y < 0.0);
    }

    #[test]
    fn projection_aspect_is_width_over_height() {
        let camera = Camera::new();
        let square = camera.projection(vk::Extent2D {
            width: 600,
            height: 600,
        });
        let wide = camera.projection(vk::Extent2D {
            width: 1200,
            height: 600,
        });
        // Horizontal focal length shrinks as the image widens.
        assert!(wide.x_axis.x < square.x_axis.x);
        // At aspect 1 the X and (pre-flip) Y focal lengths coincide.
        assert_eq!(square.x_axis.x, -square.y_axis.y);
    }
}

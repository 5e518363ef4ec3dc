mod camera;

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use color_eyre::Result;
use glam::{Mat4, Quat, Vec2, Vec3};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::app::camera::Camera;
use crate::renderer::scene::{Mesh, Motion, Scene, Transform};
use crate::renderer::shader;
use crate::renderer::shader_data::SceneUniform;
use crate::renderer::{FrameAcquire, RenderConfig, Renderer, UniformHandle};

pub struct App {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    camera: Camera,
    scene_uniform: Option<UniformHandle<SceneUniform>>,

    // State
    prev_frame_time: Instant,
    delta_time_secs: f32,
    request_redraws: bool,
    close_requested: bool,
}

impl App {
    pub fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            camera: Camera::new(),
            scene_uniform: None,

            prev_frame_time: Instant::now(),
            delta_time_secs: 0.0,
            request_redraws: true,
            close_requested: false,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(self)?;
        Ok(())
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let mut renderer = Renderer::new(window, RenderConfig::default())?;

        self.scene_uniform = Some(renderer.register_uniform::<SceneUniform>(
            vk::ShaderStageFlags::VERTEX,
        )?);
        renderer.finalize_bindings()?;

        renderer.register_shader_stage(
            shader::load_stage_code("scene.vert")?,
            vk::ShaderStageFlags::VERTEX,
        );
        renderer.register_shader_stage(
            shader::load_stage_code("scene.frag")?,
            vk::ShaderStageFlags::FRAGMENT,
        );

        populate_scene(renderer.scene());

        let size = window.inner_size();
        renderer.build_display((size.width, size.height))?;

        self.renderer = Some(renderer);
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut())
        else {
            return Ok(());
        };

        integrate_motion(renderer.scene(), self.delta_time_secs);

        let size = window.inner_size();
        let image_index = match renderer.acquire_frame((size.width, size.height))? {
            FrameAcquire::Image(image_index) => image_index,
            FrameAcquire::Skip => return Ok(()),
        };

        if let (Some(handle), Some(extent)) = (self.scene_uniform, renderer.presentation_extent())
        {
            let uniform = SceneUniform {
                view: self.camera.view(),
                proj: self.camera.projection(extent),
                model: Mat4::IDENTITY,
            };
            renderer.write_uniform(&handle, image_index, &uniform)?;
        }

        renderer.submit_and_present()?;
        Ok(())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

/// Two overlapping panes, one drifting and one fixed, so that both the
/// in-place geometry refresh and the depth test are visibly exercised.
fn populate_scene(scene: &mut Scene) {
    scene.register_object(
        Mesh::pane(Vec2::new(1.0, 1.0), Vec3::new(0.5, 0.5, 0.5)),
        Transform::from_translation(Vec3::new(-0.5, -0.5, 0.0)),
        Motion::Dynamic {
            velocity: Vec3::new(0.05, 0.0, 0.0),
            acceleration: Vec3::ZERO,
        },
    );
    scene.register_object(
        Mesh::pane(Vec2::new(1.0, 1.0), Vec3::new(1.0, 0.0, 0.0)),
        Transform {
            translation: Vec3::new(-0.5, -0.5, 0.5),
            rotation: Quat::from_rotation_y(30.0_f32.to_radians()),
        },
        Motion::Static,
    );
}

/// Advances `Dynamic` entities by one tick. Entities with other motion
/// kinds are left untouched so the scene stays clean when nothing moved.
fn integrate_motion(scene: &mut Scene, dt: f32) {
    for id in scene.entity_ids() {
        let dynamic = scene
            .entity(id)
            .is_some_and(|entity| matches!(entity.motion, Motion::Dynamic { .. }));
        if !dynamic {
            continue;
        }
        if let Some(entity) = scene.entity_mut(id) {
            if let Motion::Dynamic {
                velocity,
                acceleration,
            } = &mut entity.motion
            {
                *velocity += *acceleration * dt;
                entity.transform.translation += *velocity * dt;
            }
        }
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {
        let curr_frame_time = Instant::now();
        self.delta_time_secs = curr_frame_time
            .duration_since(self.prev_frame_time)
            .as_secs_f32();
        self.prev_frame_time = curr_frame_time;
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attributes = Window::default_attributes().with_title("orrery");
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(err) => {
                    log::error!("Failed to create window: {err}");
                    event_loop.exit();
                    return;
                }
            }
        }

        if self.renderer.is_none() {
            let window = self.window.as_ref().unwrap().clone();
            if let Err(err) = self.init_renderer(&window) {
                log::error!("Failed to initialize renderer: {err:?}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|window| window.id()) != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_new_size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized();
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.draw() {
                    log::error!("Frame failed: {err:?}");
                    self.close_requested = true;
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match key.as_ref() {
                Key::Character("r") => {
                    self.request_redraws = !self.request_redraws;
                    log::info!("request_redraws: {}", self.request_redraws);
                }
                Key::Named(NamedKey::Escape) => {
                    self.close_requested = true;
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.request_redraws {
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }

        if self.close_requested {
            event_loop.exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic(velocity: Vec3, acceleration: Vec3) -> Motion {
        Motion::Dynamic {
            velocity,
            acceleration,
        }
    }

    #[test]
    fn integration_moves_only_dynamic_entities() {
        let mut scene = Scene::new();
        let moving = scene.register_object(
            Mesh::triangle(Vec3::ONE),
            Transform::from_translation(Vec3::ZERO),
            dynamic(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO),
        );
        let still = scene.register_object(
            Mesh::triangle(Vec3::ONE),
            Transform::from_translation(Vec3::ONE),
            Motion::Static,
        );
        scene.clear_dirty();

        integrate_motion(&mut scene, 0.5);

        assert_eq!(
            scene.entity(moving).unwrap().transform.translation,
            Vec3::new(0.5, 0.0, 0.0)
        );
        assert_eq!(scene.entity(still).unwrap().transform.translation, Vec3::ONE);
        assert!(scene.is_dirty());
    }

    #[test]
    fn integration_applies_acceleration_before_velocity() {
        let mut scene = Scene::new();
        let id = scene.register_object(
            Mesh::triangle(Vec3::ONE),
            Transform::from_translation(Vec3::ZERO),
            dynamic(Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)),
        );
        scene.clear_dirty();

        integrate_motion(&mut scene, 1.0);

        let entity = scene.entity(id).unwrap();
        assert_eq!(entity.transform.translation, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(
            entity.motion,
            dynamic(Vec3::new(2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0))
        );
    }

    #[test]
    fn static_scene_stays_clean_across_integration() {
        let mut scene = Scene::new();
        scene.register_object(
            Mesh::triangle(Vec3::ONE),
            Transform::from_translation(Vec3::ZERO),
            Motion::Static,
        );
        scene.register_object(
            Mesh::triangle(Vec3::ONE),
            Transform::from_translation(Vec3::ONE),
            Motion::Kinematic,
        );
        scene.clear_dirty();

        integrate_motion(&mut scene, 0.25);

        assert!(!scene.is_dirty());
    }
}

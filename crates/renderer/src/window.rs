use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use composer::{BackendError, Composer, FrameRequest, ParamValue, ParameterInfo, ViewportState};
use crossbeam_channel::{bounded, Sender};
use winit::dpi::{LogicalSize, PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use tracing::{error, info, warn};

use crate::gpu::{GpuBackend, GpuContext};
use crate::types::RendererConfig;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Pixels one wheel "line" counts as when the platform reports pixel deltas.
const PIXELS_PER_LINE: f64 = 40.0;

/// Builds the composer once the window and GPU backend exist.
pub type ComposerSetup =
    Box<dyn FnOnce(GpuBackend, ViewportState) -> Result<Composer<GpuBackend>> + Send>;

/// Requests the control panel sends into the running frame loop.
#[derive(Debug)]
pub enum ControlCommand {
    SetParameter {
        key: String,
        value: ParamValue,
        reply: Sender<Result<ParamValue>>,
    },
    Toggle {
        stage: String,
        reply: Sender<Result<bool>>,
    },
    DumpParameters {
        reply: Sender<Vec<ParameterInfo>>,
    },
    Shutdown,
}

/// Cloneable handle for driving a running window from other threads.
#[derive(Clone)]
pub struct ControlHandle {
    proxy: EventLoopProxy<ControlCommand>,
}

impl ControlHandle {
    fn send(&self, command: ControlCommand) -> Result<()> {
        self.proxy
            .send_event(command)
            .map_err(|_| anyhow!("window event loop has exited"))
    }

    pub fn set_parameter(&self, key: &str, value: ParamValue) -> Result<ParamValue> {
        let (reply, response) = bounded(1);
        self.send(ControlCommand::SetParameter {
            key: key.to_string(),
            value,
            reply,
        })?;
        response
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|err| anyhow!("no reply from window: {err}"))?
    }

    pub fn toggle(&self, stage: &str) -> Result<bool> {
        let (reply, response) = bounded(1);
        self.send(ControlCommand::Toggle {
            stage: stage.to_string(),
            reply,
        })?;
        response
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|err| anyhow!("no reply from window: {err}"))?
    }

    pub fn parameters(&self) -> Result<Vec<ParameterInfo>> {
        let (reply, response) = bounded(1);
        self.send(ControlCommand::DumpParameters { reply })?;
        response
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|err| anyhow!("no reply from window: {err}"))
    }

    pub fn shutdown(&self) {
        let _ = self.send(ControlCommand::Shutdown);
    }
}

/// A window plus frame loop running on its own thread.
pub struct WindowRuntime {
    handle: ControlHandle,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl WindowRuntime {
    pub fn spawn(config: RendererConfig, setup: ComposerSetup) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("fxview-window".into())
            .spawn(move || run_window_thread(config, setup, ready_tx))
            .map_err(|err| anyhow!("failed to spawn window thread: {err}"))?;

        let proxy = ready_rx
            .recv()
            .map_err(|err| anyhow!("window thread failed to initialise: {err}"))??;
        Ok(Self {
            handle: ControlHandle { proxy },
            join_handle: Some(handle),
        })
    }

    pub fn control(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Blocks until the window closes or the frame limit is reached.
    pub fn wait(mut self) -> Result<()> {
        match self.join_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|err| anyhow!("window thread panicked: {err:?}"))?,
            None => Ok(()),
        }
    }
}

impl Drop for WindowRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            self.handle.shutdown();
            let _ = handle.join();
        }
    }
}

/// Composer plus the window it presents to.
struct WindowState {
    window: Arc<Window>,
    composer: Composer<GpuBackend>,
    mouse: MouseState,
    scale_factor: f64,
    frames: FrameRequest,
    rendered: u64,
}

impl WindowState {
    fn viewport(size: PhysicalSize<u32>, scale_factor: f64) -> ViewportState {
        let logical = size.to_logical::<f64>(scale_factor);
        ViewportState::new(
            logical.width.round() as u32,
            logical.height.round() as u32,
            scale_factor as f32,
        )
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        let viewport = Self::viewport(size, self.scale_factor);
        self.composer.backend_mut().set_window_size(size);
        if let Err(err) = self.composer.resize(viewport) {
            error!(error = %err, "failed to resize pipeline buffers");
        }
    }

    fn handle_command(&mut self, command: ControlCommand) -> bool {
        match command {
            ControlCommand::SetParameter { key, value, reply } => {
                let result = self
                    .composer
                    .set_parameter(&key, value)
                    .map_err(anyhow::Error::from);
                let _ = reply.send(result);
            }
            ControlCommand::Toggle { stage, reply } => {
                let result = self.composer.toggle(&stage).map_err(anyhow::Error::from);
                let _ = reply.send(result);
            }
            ControlCommand::DumpParameters { reply } => {
                let _ = reply.send(self.composer.parameters());
            }
            ControlCommand::Shutdown => return false,
        }
        true
    }

    /// Returns false when the loop must stop.
    fn render_frame(&mut self) -> bool {
        match self.composer.render() {
            Ok(_) => {
                self.rendered += 1;
                true
            }
            Err(err) => self.recover(err),
        }
    }

    fn recover(&mut self, err: BackendError) -> bool {
        if err.is_fatal() {
            error!(error = %err, "fatal backend error; closing window");
            return false;
        }
        if err.needs_reconfigure() {
            if let Err(err) = self.composer.reconfigure_surface() {
                error!(error = %err, "failed to reconfigure surface");
            }
        } else if matches!(err, BackendError::Timeout) {
            warn!("surface timeout; retrying next frame");
        } else {
            warn!(error = %err, "frame failed; retrying next frame");
        }
        true
    }
}

fn run_window_thread(
    config: RendererConfig,
    setup: ComposerSetup,
    ready_tx: Sender<Result<EventLoopProxy<ControlCommand>>>,
) -> Result<()> {
    let mut builder = EventLoopBuilder::<ControlCommand>::with_user_event();
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
    }
    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    }

    let event_loop = match builder.build() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            let _ = ready_tx.send(Err(anyhow!("failed to create event loop: {err}")));
            return Err(anyhow!("failed to create event loop: {err}"));
        }
    };
    let proxy = event_loop.create_proxy();

    let mut state = match build_state(&config, setup, &event_loop) {
        Ok(state) => state,
        Err(err) => {
            let message = format!("failed to initialise window renderer: {err:#}");
            let _ = ready_tx.send(Err(anyhow!(message.clone())));
            return Err(anyhow!(message));
        }
    };

    let profile = state.composer.backend().adapter_profile().clone();
    info!(
        adapter = %profile.name,
        backend = ?profile.backend,
        software = profile.is_software(),
        "window renderer ready"
    );
    let _ = ready_tx.send(Ok(proxy));

    let frame_limit = config.frame_limit;
    let mut result = Ok(());
    let run_result = event_loop.run(move |event, elwt| match event {
        Event::UserEvent(command) => {
            if !state.handle_command(command) {
                elwt.exit();
            }
        }
        Event::WindowEvent { window_id, event } if window_id == state.window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && matches!(event.logical_key, Key::Named(NamedKey::Escape))
                {
                    elwt.exit();
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some((dx, dy)) = state.mouse.handle_cursor_moved(position) {
                    let height = state.window.inner_size().height as f32;
                    state.composer.controls_mut().rotate(dx, dy, height);
                }
            }
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Left,
                ..
            } => state.mouse.handle_button(button_state),
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y as f64,
                    MouseScrollDelta::PixelDelta(position) => position.y / PIXELS_PER_LINE,
                };
                // Scrolling up moves towards the target.
                state.composer.controls_mut().zoom(-lines as f32);
            }
            WindowEvent::Resized(new_size) => state.resize(new_size),
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                state.scale_factor = scale_factor;
                let size = state.window.inner_size();
                state.resize(size);
            }
            WindowEvent::RedrawRequested => {
                state.frames.take();
                if !state.render_frame() {
                    elwt.exit();
                    return;
                }
                if frame_limit.is_some_and(|limit| state.rendered >= limit) {
                    info!(frames = state.rendered, "frame limit reached");
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            if state.frames.request() {
                state.window.request_redraw();
            }
            elwt.set_control_flow(ControlFlow::Wait);
        }
        _ => {}
    });

    if let Err(err) = run_result {
        result = Err(anyhow!("window event loop error: {err}"));
    }
    result
}

fn build_state(
    config: &RendererConfig,
    setup: ComposerSetup,
    event_loop: &winit::event_loop::EventLoop<ControlCommand>,
) -> Result<WindowState> {
    let (width, height) = config.window_size;
    let mut builder = WindowBuilder::new()
        .with_title(config.title.clone())
        .with_inner_size(LogicalSize::new(width.max(1), height.max(1)));
    if !config.show_window {
        builder = builder.with_visible(false);
    }
    let window = builder
        .build(event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let window = Arc::new(window);

    let size = window.inner_size();
    let scale_factor = window.scale_factor();
    let context = GpuContext::new(window.as_ref(), size, config.antialiasing, config.power)?;
    let viewport = WindowState::viewport(size, scale_factor);
    let backend = GpuBackend::new(context, &viewport)?;
    let composer = setup(backend, viewport)?;

    Ok(WindowState {
        window,
        composer,
        mouse: MouseState::default(),
        scale_factor,
        frames: FrameRequest::new(),
        rendered: 0,
    })
}

/// Left-button drag tracking for orbit rotation.
#[derive(Default)]
struct MouseState {
    position: Option<PhysicalPosition<f64>>,
    is_pressed: bool,
}

impl MouseState {
    /// Returns the drag delta since the last move while the button is held.
    fn handle_cursor_moved(&mut self, position: PhysicalPosition<f64>) -> Option<(f32, f32)> {
        let previous = self.position.replace(position);
        if !self.is_pressed {
            return None;
        }
        previous.map(|last| ((position.x - last.x) as f32, (position.y - last.y) as f32))
    }

    fn handle_button(&mut self, state: ElementState) {
        self.is_pressed = state == ElementState::Pressed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drag_reports_deltas_only_while_pressed() {
        let mut mouse = MouseState::default();
        assert_eq!(mouse.handle_cursor_moved(PhysicalPosition::new(10.0, 10.0)), None);
        mouse.handle_button(ElementState::Pressed);
        assert_eq!(
            mouse.handle_cursor_moved(PhysicalPosition::new(14.0, 7.0)),
            Some((4.0, -3.0))
        );
        mouse.handle_button(ElementState::Released);
        assert_eq!(mouse.handle_cursor_moved(PhysicalPosition::new(20.0, 20.0)), None);
    }

    #[test]
    fn viewport_is_logical_size_plus_scale() {
        let viewport = WindowState::viewport(PhysicalSize::new(3840, 2160), 2.0);
        assert_eq!(viewport.width, 1920);
        assert_eq!(viewport.height, 1080);
        assert_eq!(viewport.buffer_size(), composer::BufferSize::new(3840, 2160));
    }

    #[test]
    fn odd_physical_size_at_scale_two_keeps_window_extent() {
        let window = PhysicalSize::new(1001, 601);
        let viewport = WindowState::viewport(window, 2.0);
        assert_eq!((viewport.width, viewport.height), (501, 301));
        assert_eq!(crate::gpu::surface_extent(Some(window), &viewport), window);
        assert_eq!(viewport.buffer_size(), composer::BufferSize::new(1002, 602));
    }
}

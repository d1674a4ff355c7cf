#![allow(clippy::too_many_arguments, clippy::missing_safety_doc)]

use anyhow::Result;
use log::*;
use renderer::Renderer;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

pub mod config;
pub mod error;
mod renderer;
mod vulkan;

pub use config::RendererConfig;

#[derive(Debug)]
pub struct Engine {
    window: Window,
    renderer: Renderer,
    event_loop: EventLoop<()>,
}

impl Engine {
    pub fn new(config: RendererConfig) -> Result<Engine> {
        // Window
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(config.window.title.as_str())
            .with_inner_size(LogicalSize::new(config.window.width, config.window.height))
            .build(&event_loop)?;

        let renderer = unsafe { Renderer::create(&window, config)? };

        Ok(Engine {
            window,
            renderer,
            event_loop,
        })
    }

    pub fn run(self) -> Result<()> {
        let Engine {
            window,
            renderer,
            event_loop,
        } = self;

        // Dropped on close, while the window is still alive.
        let mut renderer = Some(renderer);
        let mut failure = None;

        event_loop.run(|event, elwt| {
            match event {
                // Request a redraw when all events were processed.
                Event::AboutToWait => window.request_redraw(),
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::RedrawRequested if !elwt.exiting() => {
                        if let Some(r) = renderer.as_mut() {
                            if let Err(e) = unsafe { r.render(&window) } {
                                error!("Rendering failed: {:#}", e);
                                failure = Some(e);
                                renderer = None;
                                elwt.exit();
                            }
                        }
                    }
                    WindowEvent::Resized(_) => {
                        if let Some(r) = renderer.as_mut() {
                            r.resized();
                        }
                    }
                    WindowEvent::CloseRequested => {
                        elwt.exit();
                        renderer = None;
                    }
                    _ => {}
                },
                _ => {}
            }
        })?;

        drop(renderer);

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

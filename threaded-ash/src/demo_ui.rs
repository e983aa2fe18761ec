//! The widgets every window draws.

use dear_imgui_rs::{Condition, Ui};

/// Per-window demo state.
#[derive(Clone, Debug)]
pub struct DemoUi {
    index: usize,
    pub show_demo_window: bool,
    pub show_another_window: bool,
    pub value: f32,
    pub counter: u32,
    clear_color: [f32; 4],
}

impl DemoUi {
    pub fn new(index: usize, clear_color: [f32; 4]) -> Self {
        Self {
            index,
            show_demo_window: true,
            show_another_window: false,
            value: 0.0,
            counter: 0,
            clear_color,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Straight-alpha clear color chosen in the editor.
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn draw(&mut self, ui: &Ui) {
        if self.show_demo_window {
            ui.show_demo_window(&mut self.show_demo_window);
        }

        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");

        ui.window("Hello, world!")
            .size([360.0, 220.0], Condition::FirstUseEver)
            .build(|| {
                ui.text(format!(
                    "Window #{} rendered by thread '{thread_name}'.",
                    self.index + 1
                ));
                ui.text("This is some useful text.");
                ui.checkbox("Demo Window", &mut self.show_demo_window);
                ui.checkbox("Another Window", &mut self.show_another_window);

                ui.slider_f32("float", &mut self.value, 0.0, 1.0);

                let [r, g, b, a] = self.clear_color;
                let mut rgb = [r, g, b];
                if ui.color_edit3("clear color", &mut rgb) {
                    self.clear_color = [rgb[0], rgb[1], rgb[2], a];
                }

                if ui.button("Button") {
                    self.counter += 1;
                }
                ui.same_line();
                ui.text(format!("counter = {}", self.counter));

                let framerate = ui.io().framerate();
                ui.text(format!(
                    "Application average {:.3} ms/frame ({:.1} FPS)",
                    1000.0 / framerate,
                    framerate
                ));
            });

        if self.show_another_window {
            ui.window("Another Window")
                .size([240.0, 100.0], Condition::FirstUseEver)
                .build(|| {
                    ui.text(format!("Hello from window #{}!", self.index + 1));
                    if ui.button("Close Me") {
                        self.show_another_window = false;
                    }
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::WindowContext;

    #[test]
    fn draws_headless_without_touching_state() {
        let mut demo = DemoUi::new(1, [0.45, 0.55, 0.60, 1.0]);
        demo.show_another_window = true;

        let mut ctx = WindowContext::new("demo", |ctx| {
            let _ = ctx.set_ini_filename::<std::path::PathBuf>(None);
            let io = ctx.io_mut();
            io.set_display_size([800.0, 600.0]);
            io.set_delta_time(1.0 / 60.0);
            let flags = io.backend_flags() | dear_imgui_rs::BackendFlags::RENDERER_HAS_TEXTURES;
            io.set_backend_flags(flags);
            Ok(())
        })
        .unwrap();

        ctx.with_active(|ctx| {
            for _ in 0..2 {
                let ui = ctx.frame();
                demo.draw(ui);
                let _ = ctx.render();
            }
        })
        .unwrap();

        assert_eq!(demo.counter, 0);
        assert_eq!(demo.clear_color(), [0.45, 0.55, 0.60, 1.0]);
        assert!(demo.show_demo_window);
        assert!(demo.show_another_window);
    }
}

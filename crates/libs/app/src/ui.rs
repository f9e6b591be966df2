use gui::imgui::{Condition, TextureId, Ui};
use renderer::MasterRenderSystem;

use crate::FrameStats;

/// The engine's own panels: the viewport showing the scene image and the
/// renderer controls the orchestrator reads as edge triggers.
pub fn build_engine_ui(
    ui: &Ui,
    master: &mut MasterRenderSystem,
    stats: &FrameStats,
    scene_texture: TextureId,
) {
    build_viewport(ui, master, scene_texture);
    build_renderer_panel(ui, master, stats);
}

fn build_viewport(ui: &Ui, master: &MasterRenderSystem, scene_texture: TextureId) {
    let style = ui.push_style_var(gui::imgui::StyleVar::WindowPadding([0.0, 0.0]));

    ui.window("Viewport")
        .size([960.0, 540.0], Condition::FirstUseEver)
        .build(|| {
            let region = ui.content_region_avail();
            let aspect = master.scene_aspect_ratio();
            let fitted = gui::fit_to_region(region, aspect);

            // center the image inside the window
            let cursor = ui.cursor_pos();
            ui.set_cursor_pos([
                cursor[0] + (region[0] - fitted[0]) * 0.5,
                cursor[1] + (region[1] - fitted[1]) * 0.5,
            ]);

            gui::imgui::Image::new(scene_texture, fitted).build(ui);
        });

    style.pop();
}

fn build_renderer_panel(ui: &Ui, master: &mut MasterRenderSystem, stats: &FrameStats) {
    ui.window("Renderer")
        .size([320.0, 400.0], Condition::FirstUseEver)
        .build(|| {
            ui.text(format!("{} fps ({:?})", stats.fps, stats.frame_time));
            ui.separator();

            ui.checkbox("Enable Raytracing", &mut master.raytracing_enabled);

            if master.raytracing_enabled {
                ui.checkbox("Enable Denoising", &mut master.denoising_enabled);
                ui.text(format!("instances: {}", master.instance_count()));
                ui.text(format!("emitters: {}", master.emitter_count()));
            } else {
                ui.checkbox("Enable Debug View", &mut master.debug_enabled);
            }

            ui.separator();

            if ui.button("Reload Shaders") {
                master.request_shader_reload();
            }
            ui.text_wrapped(
                "Reload after editing the shaders of the active branch; \
                 the other branch keeps its pipelines.",
            );

            ui.separator();

            if ui.collapsing_header("Volume Noise Settings", gui::imgui::TreeNodeFlags::empty()) {
                ui.text(format!("Global majorant: {:.2}", master.density.global_majorant()));

                let mut dirty = false;
                dirty |= ui.slider("Noise Frequency", 0.0, 32.0, &mut master.density.noise_frequency);
                dirty |= ui.slider("Worley Weight", 0.0, 5.0, &mut master.density.worley_exponent);
                if ui.button("Regenerate Volume") {
                    dirty = true;
                }

                if dirty {
                    master.density.request_regeneration();
                }
            }
        });
}

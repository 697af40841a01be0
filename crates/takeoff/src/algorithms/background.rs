use crate::{
    error::{Result, TakeoffError},
    traits::{ProgressSink, TransformStage},
    types::{Color, Drawing, Element, ElementRole, Geometry, Style},
};

/// Stage 3: places exactly one opaque background rectangle beneath all
/// content. Rerunning replaces the existing background and keeps its id.
#[derive(Debug, Clone)]
pub struct BackgroundCompositor {
    pub color: Color,
}

impl Default for BackgroundCompositor {
    fn default() -> Self {
        Self { color: Color::WHITE }
    }
}

impl TransformStage for BackgroundCompositor {
    fn name(&self) -> &'static str {
        "add_background"
    }

    fn apply(&self, drawing: &mut Drawing, progress: &dyn ProgressSink) -> Result<()> {
        if !(drawing.width.is_finite() && drawing.height.is_finite())
            || drawing.width <= 0.0
            || drawing.height <= 0.0
        {
            return Err(TakeoffError::stage(
                self.name(),
                format!("cannot cover a {}x{} canvas", drawing.width, drawing.height),
            ));
        }

        let existing_id = drawing.elements.iter().find(|e| e.is_background()).map(|e| e.id);
        let id = match existing_id {
            Some(id) => id,
            None => drawing
                .next_id()
                .map_err(|error| TakeoffError::stage(self.name(), error.to_string()))?,
        };
        let replaced = drawing.background_count();
        drawing.elements.retain(|e| !e.is_background());

        drawing.elements.insert(
            0,
            Element {
                id,
                geometry: Geometry::rect(0.0, 0.0, drawing.width, drawing.height),
                style: Style {
                    stroke: None,
                    fill: Some(self.color),
                    stroke_width: 0.0,
                },
                role: ElementRole::Background,
            },
        );

        tracing::debug!(replaced, color = %self.color, "composited background");
        progress.narrate(
            self.name(),
            &format!("added {} background {}x{}", self.color, drawing.width, drawing.height),
        );
        Ok(())
    }
}

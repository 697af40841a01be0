use crate::{
    error::{Result, TakeoffError},
    traits::{ProgressSink, TransformStage},
    types::{Color, Drawing},
};

/// Stage 2: collapses every stroke color onto two tones. Strokes whose
/// luminance is at or above `threshold` become `light`, the rest `dark`.
#[derive(Debug, Clone)]
pub struct StyleNormalizer {
    pub threshold: f32,
    pub light: Color,
    pub dark: Color,
}

impl Default for StyleNormalizer {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            light: Color::LIGHT_GRAY,
            dark: Color::BLACK,
        }
    }
}

impl StyleNormalizer {
    pub fn classify(&self, color: Color) -> Color {
        if color.luminance() >= self.threshold {
            self.light
        } else {
            self.dark
        }
    }
}

impl TransformStage for StyleNormalizer {
    fn name(&self) -> &'static str {
        "normalize_stroke_colors"
    }

    fn apply(&self, drawing: &mut Drawing, progress: &dyn ProgressSink) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(TakeoffError::stage(
                self.name(),
                format!("luminance threshold {} outside [0, 1]", self.threshold),
            ));
        }

        let (mut light, mut dark) = (0usize, 0usize);
        for element in drawing.elements.iter_mut().filter(|e| !e.is_background()) {
            let Some(stroke) = element.style.stroke else {
                continue;
            };
            let tone = self.classify(stroke);
            if tone == self.light {
                light += 1;
            } else {
                dark += 1;
            }
            element.style.stroke = Some(tone);
        }

        tracing::debug!(light, dark, "normalized stroke colors");
        progress.narrate(
            self.name(),
            &format!("{dark} strokes set to {}, {light} strokes set to {}", self.dark, self.light),
        );
        Ok(())
    }
}

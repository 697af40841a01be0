//! End-to-end behaviour of the eight-stage pipeline on synthetic drawings.

mod common;

use std::{collections::BTreeMap, sync::Arc};

use takeoff::{
    BackgroundCompositor, CancelFlag, Drawing, MarkerCategory, NullProgress, PathDeduplicator,
    PipelineBuilder, PipelineConfig, PipelineRun, ProgressSink, StageState, TransformStage,
};

use common::{one_of_each, scenario_drawing};

fn run_default(drawing: &mut Drawing) -> PipelineRun {
    PipelineBuilder::from_config(&PipelineConfig::default())
        .with_progress(NullProgress)
        .build()
        .run(drawing, &CancelFlag::new())
}

fn counts(run: &PipelineRun) -> BTreeMap<MarkerCategory, Option<u32>> {
    MarkerCategory::all().map(|c| (c, run.count(c))).collect()
}

fn permutations(items: &[MarkerCategory]) -> Vec<Vec<MarkerCategory>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            all.push(tail);
        }
    }
    all
}

#[test]
fn concrete_scenario_counts() {
    let mut drawing = scenario_drawing();
    let run = run_default(&mut drawing);

    assert!(run.succeeded(), "{}", run.summary());
    assert_eq!(run.count(MarkerCategory::BlueX), Some(3));
    assert_eq!(run.count(MarkerCategory::RedSquare), Some(5));
    assert_eq!(run.count(MarkerCategory::PinkShape), Some(0));
    assert_eq!(run.count(MarkerCategory::GreenRectangle), Some(2));
    assert_eq!(run.summary(), "Steps completed: 8/8");
}

#[test]
fn round_trip_one_of_each() {
    let mut drawing = one_of_each();
    let run = run_default(&mut drawing);

    assert!(run.succeeded(), "{}", run.summary());
    for category in MarkerCategory::all() {
        assert_eq!(
            drawing.elements_colored(category.color()).len(),
            1,
            "{category} should color exactly one element"
        );
        assert_eq!(run.count(category), Some(1), "{category}");
    }
}

#[test]
fn rotated_quads_keep_their_category() {
    for degrees in [15.0, 30.0, 45.0, 60.0] {
        let mut drawing = Drawing::new(200.0, 120.0);
        let ink = takeoff::Style::stroked(takeoff::Color::BLACK);
        drawing.push(common::rotated_rect(50.0, 60.0, 24.0, 10.0, degrees), ink.clone());
        drawing.push(common::rotated_rect(140.0, 60.0, 12.0, 12.0, degrees), ink);
        let run = run_default(&mut drawing);

        assert!(run.succeeded(), "{}", run.summary());
        assert_eq!(drawing.elements_colored(MarkerCategory::GreenRectangle.color()).len(), 1, "{degrees}");
        assert_eq!(run.count(MarkerCategory::GreenRectangle), Some(1), "{degrees}");
        assert_eq!(run.count(MarkerCategory::RedSquare), Some(1), "{degrees}");
    }
}

#[test]
fn detector_order_does_not_change_counts() {
    let categories: Vec<MarkerCategory> = MarkerCategory::all().collect();
    let mut reference = scenario_drawing();
    let expected = counts(&run_default(&mut reference));

    for order in permutations(&categories) {
        let mut drawing = scenario_drawing();
        let run = PipelineBuilder::from_config(&PipelineConfig::default())
            .with_detector_order(&order)
            .with_progress(NullProgress)
            .build()
            .run(&mut drawing, &CancelFlag::new());
        assert_eq!(counts(&run), expected, "order {order:?}");
    }
}

#[test]
fn detector_subset_matches_full_run() {
    let mut reference = scenario_drawing();
    let expected = counts(&run_default(&mut reference));

    let mut drawing = scenario_drawing();
    let run = PipelineBuilder::from_config(&PipelineConfig::default())
        .with_detector_order(&[MarkerCategory::GreenRectangle])
        .with_progress(NullProgress)
        .build()
        .run(&mut drawing, &CancelFlag::new());
    assert_eq!(run.count(MarkerCategory::GreenRectangle), expected[&MarkerCategory::GreenRectangle]);
    assert_eq!(run.count(MarkerCategory::BlueX), None);
}

#[test]
fn raising_min_area_never_raises_counts() {
    let mut previous: Option<BTreeMap<MarkerCategory, Option<u32>>> = None;
    for marker_min_area in [0, 1, 8, 16, 40, 64, 128, 100_000] {
        let config = PipelineConfig {
            marker_min_area,
            ..Default::default()
        };
        let mut drawing = scenario_drawing();
        let run = PipelineBuilder::from_config(&config)
            .with_progress(NullProgress)
            .build()
            .run(&mut drawing, &CancelFlag::new());
        let current = counts(&run);

        if let Some(previous) = &previous {
            for category in MarkerCategory::all() {
                assert!(
                    current[&category] <= previous[&category],
                    "{category} rose at min area {marker_min_area}"
                );
            }
        }
        previous = Some(current);
    }
    let last = previous.unwrap();
    assert!(last.values().all(|count| *count == Some(0)));
}

#[test]
fn dedup_is_a_fixed_point() {
    let mut drawing = scenario_drawing();
    let stage = PathDeduplicator::default();
    stage.apply(&mut drawing, &NullProgress).unwrap();
    let once = drawing.clone();
    stage.apply(&mut drawing, &NullProgress).unwrap();
    assert_eq!(drawing, once);
}

#[test]
fn duplicate_copies_collapse() {
    for copies in [1, 2, 3, 10] {
        let mut drawing = Drawing::new(100.0, 100.0);
        for _ in 0..copies {
            drawing.push(common::x_mark(10.0, 10.0, 12.0), takeoff::Style::default());
        }
        PathDeduplicator::default().apply(&mut drawing, &NullProgress).unwrap();
        assert_eq!(drawing.elements.len(), 1, "{copies} copies");
    }
}

#[test]
fn rerunning_the_pipeline_keeps_one_background() {
    let mut drawing = scenario_drawing();
    let first = run_default(&mut drawing);
    let second = run_default(&mut drawing);
    BackgroundCompositor::default().apply(&mut drawing, &NullProgress).unwrap();

    assert_eq!(drawing.background_count(), 1);
    assert!(drawing.elements[0].is_background());
    assert_eq!(counts(&first), counts(&second));
}

struct CancelAfter {
    stage: &'static str,
    flag: CancelFlag,
}

impl ProgressSink for CancelAfter {
    fn narrate(&self, stage: &str, _message: &str) {
        if stage == self.stage {
            self.flag.cancel();
        }
    }
}

#[test]
fn cancellation_between_stages() {
    let flag = CancelFlag::new();
    let pipeline = PipelineBuilder::from_config(&PipelineConfig::default())
        .with_shared_progress(Arc::new(CancelAfter {
            stage: "normalize_stroke_colors",
            flag: flag.clone(),
        }))
        .build();
    let mut drawing = scenario_drawing();
    let run = pipeline.run(&mut drawing, &flag);

    assert!(run.cancelled);
    assert!(!run.succeeded());
    let states: Vec<StageState> = run.stages.iter().map(|s| s.state).collect();
    assert_eq!(&states[..2], &[StageState::Succeeded, StageState::Succeeded]);
    assert!(states[2..].iter().all(|s| *s == StageState::Pending));
    assert_eq!(drawing.background_count(), 0);
    assert!(run.detections.is_empty());
}

#[tokio::test]
async fn concurrent_detectors_match_sequential() {
    let mut sequential = scenario_drawing();
    let expected = counts(&run_default(&mut sequential));

    let pipeline = PipelineBuilder::from_config(&PipelineConfig::default())
        .with_progress(NullProgress)
        .build();
    let mut drawing = scenario_drawing();
    let run = pipeline.run_concurrent(&mut drawing, &CancelFlag::new()).await;

    assert!(run.succeeded(), "{}", run.summary());
    assert_eq!(counts(&run), expected);
    assert_eq!(drawing, sequential);
}

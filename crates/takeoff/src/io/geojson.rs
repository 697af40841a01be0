use std::{collections::BTreeMap, path::Path};

use geojson::{Feature, FeatureCollection, Geometry, Value};
use serde_json::{Map, Number, Value as Json};

use crate::{
    error::{Result, TakeoffError},
    marker::{DetectedComponent, DetectionResult, MarkerCategory},
};

fn number(value: f64) -> Json {
    Number::from_f64(value).map(Json::Number).unwrap_or(Json::Null)
}

fn component_feature(id: usize, category: MarkerCategory, component: &DetectedComponent) -> Feature {
    let [x0, y0] = component.bbox.min.map(f64::from);
    let [x1, y1] = component.bbox.max.map(f64::from);
    let ring = vec![
        vec![x0, y0],
        vec![x1, y0],
        vec![x1, y1],
        vec![x0, y1],
        vec![x0, y0],
    ];

    let mut properties = Map::new();
    properties.insert("category".to_string(), Json::String(category.to_string()));
    properties.insert("color".to_string(), Json::String(category.color().hex()));
    properties.insert(
        "centroid".to_string(),
        Json::Array(component.centroid.iter().map(|&c| number(c as f64)).collect()),
    );
    properties.insert("area_px".to_string(), Json::Number(Number::from(component.area_px)));

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
        id: Some(geojson::feature::Id::Number(Number::from(id))),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// One polygon feature per detected component, its bounding box in drawing units
pub fn detections_to_geojson<'a>(detections: impl IntoIterator<Item = &'a DetectionResult>) -> FeatureCollection {
    let mut features = Vec::new();
    let mut counts = Map::new();
    for detection in detections {
        counts.insert(detection.category.to_string(), Json::Number(Number::from(detection.count)));
        for component in &detection.components {
            features.push(component_feature(features.len(), detection.category, component));
        }
    }

    let mut foreign_members = Map::new();
    foreign_members.insert("counts".to_string(), Json::Object(counts));
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign_members),
    }
}

pub fn detections_to_geojson_string<'a>(detections: impl IntoIterator<Item = &'a DetectionResult>) -> Result<String> {
    Ok(serde_json::to_string_pretty(&detections_to_geojson(detections))?)
}

pub fn save_detections_geojson<'a, P: AsRef<Path>>(
    path: P,
    detections: impl IntoIterator<Item = &'a DetectionResult>,
) -> Result<()> {
    std::fs::write(path, detections_to_geojson_string(detections)?)?;
    Ok(())
}

/// Per-category feature counts of a collection written by [`detections_to_geojson`]
pub fn counts_from_geojson(geojson_str: &str) -> Result<BTreeMap<MarkerCategory, u32>> {
    let collection: FeatureCollection = geojson_str.parse()?;
    let mut counts = BTreeMap::new();
    for feature in &collection.features {
        let category = feature
            .property("category")
            .and_then(Json::as_str)
            .ok_or_else(|| TakeoffError::InvalidDrawing("feature without a category".into()))?;
        let category: MarkerCategory = category
            .parse()
            .map_err(|_| TakeoffError::InvalidDrawing(format!("unknown category '{category}'")))?;
        *counts.entry(category).or_insert(0) += 1;
    }
    Ok(counts)
}

//! Shared math utilities for detection infrastructure.
//!
//! Bounding-box IoU and greedy NMS for the detector, vector normalization
//! for the embedder.

/// IoU between two bounding boxes represented as `[x1, y1, x2, y2]`.
pub fn bbox_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

/// Greedy NMS over `(bbox, confidence)` pairs.
///
/// Sorts by confidence descending (stable, so equal scores keep input
/// order) and drops any box overlapping a kept box by more than `iou_thresh`.
pub fn nms(mut dets: Vec<([f64; 4], f64)>, iou_thresh: f64) -> Vec<([f64; 4], f64)> {
    dets.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut keep: Vec<([f64; 4], f64)> = Vec::new();
    for det in dets {
        if keep.iter().all(|k| bbox_iou(&k.0, &det.0) <= iou_thresh) {
            keep.push(det);
        }
    }
    keep
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

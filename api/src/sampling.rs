//! Frame sampling and keypoint normalization
//!
//! Turns an arbitrary-length video into the fixed `(target_count, feature_len)`
//! tensor the classifier was trained on. Group order inside a row is pose,
//! face, left hand, right hand; changing it silently breaks predictions.

use ndarray::{Array2, ArrayView1};

use crate::models::{FrameRecord, LandmarkGroupSizes, POINT_DIMS, POSE_POINT_DIMS};

/// Pick `target_count` evenly spaced frame indices out of `total_frames`.
///
/// Short videos yield every index once; no padding happens here. Duplicate
/// indices are kept as-is.
pub fn sample_indices(total_frames: usize, target_count: usize) -> Vec<usize> {
    if total_frames < target_count {
        return (0..total_frames).collect();
    }

    (0..target_count)
        .map(|i| i * total_frames / target_count)
        .collect()
}

/// Append empty frames until the sequence holds `target_count` frames.
/// Never truncates.
pub fn pad(mut frames: Vec<FrameRecord>, target_count: usize) -> Vec<FrameRecord> {
    while frames.len() < target_count {
        let frame_id = frames.len() as u32;
        frames.push(FrameRecord::empty(frame_id));
    }
    frames
}

/// Flatten one frame into a vector of exactly `sizes.feature_len()` values.
pub fn flatten(frame: &FrameRecord, sizes: &LandmarkGroupSizes) -> Vec<f32> {
    let mut out = vec![0.0; sizes.feature_len()];
    flatten_into(frame, sizes, &mut out);
    out
}

fn flatten_into(frame: &FrameRecord, sizes: &LandmarkGroupSizes, out: &mut [f32]) {
    let (pose, rest) = out.split_at_mut(sizes.pose_len());
    let (face, rest) = rest.split_at_mut(sizes.face_len());
    let (left, right) = rest.split_at_mut(sizes.left_hand_len());

    for (slot, p) in pose
        .chunks_exact_mut(POSE_POINT_DIMS)
        .zip(&frame.pose_landmarks)
    {
        slot.copy_from_slice(&[p.x, p.y, p.z, p.visibility]);
    }

    for (group, points) in [
        (face, &frame.face_landmarks),
        (left, &frame.left_hand_landmarks),
        (right, &frame.right_hand_landmarks),
    ] {
        for (slot, p) in group.chunks_exact_mut(POINT_DIMS).zip(points) {
            slot.copy_from_slice(&[p.x, p.y, p.z]);
        }
    }
}

/// Stack flattened frames into a rank-2 tensor, one row per frame, in order.
///
/// Callers pad to the target length first; the classifier adapter validates
/// the resulting shape.
pub fn assemble(frames: &[FrameRecord], sizes: &LandmarkGroupSizes) -> Array2<f32> {
    let mut tensor = Array2::<f32>::zeros((frames.len(), sizes.feature_len()));
    for (mut row, frame) in tensor.rows_mut().into_iter().zip(frames) {
        let values = flatten(frame, sizes);
        row.assign(&ArrayView1::from(values.as_slice()));
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LandmarkPoint, PosePoint};

    fn full_frame(frame_id: u32, sizes: &LandmarkGroupSizes) -> FrameRecord {
        FrameRecord {
            frame_id,
            face_landmarks: vec![LandmarkPoint::new(0.1, 0.2, 0.3); sizes.face],
            pose_landmarks: vec![PosePoint::new(0.4, 0.5, 0.6, 0.7); sizes.pose],
            left_hand_landmarks: vec![LandmarkPoint::new(0.8, 0.9, 1.0); sizes.left_hand],
            right_hand_landmarks: vec![LandmarkPoint::new(1.1, 1.2, 1.3); sizes.right_hand],
        }
    }

    #[test]
    fn test_sample_indices_count_and_range() {
        for target in [1, 7, 30] {
            for total in target..target * 12 {
                let idx = sample_indices(total, target);
                assert_eq!(idx.len(), target, "total={total} target={target}");
                assert!(idx.windows(2).all(|w| w[0] <= w[1]));
                assert!(idx.iter().all(|&i| i < total));
                assert_eq!(idx[0], 0);
            }
        }
    }

    #[test]
    fn test_sample_indices_short_video_passes_through() {
        assert_eq!(sample_indices(10, 30), (0..10).collect::<Vec<_>>());
        assert_eq!(sample_indices(29, 30).len(), 29);
        assert!(sample_indices(0, 30).is_empty());
    }

    #[test]
    fn test_sample_indices_hundred_frames() {
        let idx = sample_indices(100, 30);
        assert_eq!(&idx[..6], &[0, 3, 6, 10, 13, 16]);
        assert_eq!(idx[29], 96);
        for (i, v) in idx.iter().enumerate() {
            assert_eq!(*v, i * 100 / 30);
        }
    }

    #[test]
    fn test_sample_indices_exact_length() {
        assert_eq!(sample_indices(30, 30), (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_pad_appends_sequential_empty_frames() {
        let frames = vec![FrameRecord::empty(0), FrameRecord::empty(1)];
        let padded = pad(frames, 5);
        assert_eq!(padded.len(), 5);
        for (i, f) in padded.iter().enumerate() {
            assert_eq!(f.frame_id, i as u32);
            assert!(f.is_empty());
        }
    }

    #[test]
    fn test_pad_is_idempotent() {
        let sizes = LandmarkGroupSizes::default();
        for len in 0..=30 {
            let frames: Vec<_> = (0..len).map(|i| full_frame(i as u32, &sizes)).collect();
            let once = pad(frames, 30);
            let twice = pad(once.clone(), 30);
            assert_eq!(once, twice);
            assert_eq!(once.len(), 30);
        }
    }

    #[test]
    fn test_pad_never_truncates() {
        let frames: Vec<_> = (0..4).map(FrameRecord::empty).collect();
        assert_eq!(pad(frames, 2).len(), 4);
    }

    #[test]
    fn test_flatten_length_is_fixed() {
        let sizes = LandmarkGroupSizes::default();
        assert_eq!(flatten(&FrameRecord::empty(0), &sizes).len(), 1662);
        assert_eq!(flatten(&full_frame(0, &sizes), &sizes).len(), 1662);

        let mut partial = FrameRecord::empty(0);
        partial.face_landmarks = vec![LandmarkPoint::new(1.0, 1.0, 1.0); 12];
        partial.right_hand_landmarks = vec![LandmarkPoint::new(1.0, 1.0, 1.0); 40];
        assert_eq!(flatten(&partial, &sizes).len(), 1662);
    }

    #[test]
    fn test_flatten_zero_substitutes_empty_face() {
        let sizes = LandmarkGroupSizes::default();
        let mut frame = full_frame(0, &sizes);
        frame.face_landmarks.clear();

        let v = flatten(&frame, &sizes);
        let pose = &v[..132];
        let face = &v[132..132 + 1404];
        assert!(pose.chunks(4).all(|c| c == [0.4, 0.5, 0.6, 0.7]));
        assert!(face.iter().all(|&x| x == 0.0));
        assert!(v[1536..1599].chunks(3).all(|c| c == [0.8, 0.9, 1.0]));
        assert!(v[1599..].chunks(3).all(|c| c == [1.1, 1.2, 1.3]));
    }

    #[test]
    fn test_flatten_group_order_and_row_major() {
        let sizes = LandmarkGroupSizes::default();
        let mut frame = FrameRecord::empty(0);
        frame.pose_landmarks = vec![PosePoint::new(1.0, 2.0, 3.0, 4.0), PosePoint::new(5.0, 6.0, 7.0, 8.0)];
        frame.face_landmarks = vec![LandmarkPoint::new(9.0, 10.0, 11.0)];
        frame.left_hand_landmarks = vec![LandmarkPoint::new(12.0, 13.0, 14.0)];
        frame.right_hand_landmarks = vec![LandmarkPoint::new(15.0, 16.0, 17.0)];

        let v = flatten(&frame, &sizes);
        assert_eq!(&v[0..8], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(&v[132..135], &[9.0, 10.0, 11.0]);
        assert_eq!(&v[1536..1539], &[12.0, 13.0, 14.0]);
        assert_eq!(&v[1599..1602], &[15.0, 16.0, 17.0]);
        assert_eq!(v.iter().filter(|&&x| x != 0.0).count(), 17);
    }

    #[test]
    fn test_assemble_shape_and_rows() {
        let sizes = LandmarkGroupSizes::default();
        let frames = pad(vec![full_frame(0, &sizes)], 30);
        let tensor = assemble(&frames, &sizes);

        assert_eq!(tensor.dim(), (30, 1662));
        assert_eq!(tensor.row(0).to_vec(), flatten(&frames[0], &sizes));
        assert!(tensor.row(1).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_custom_group_sizes() {
        let sizes = LandmarkGroupSizes {
            face: 2,
            pose: 1,
            left_hand: 1,
            right_hand: 1,
        };
        assert_eq!(sizes.feature_len(), 4 + 6 + 3 + 3);
        let v = flatten(&full_frame(0, &sizes), &sizes);
        assert_eq!(v, vec![0.4, 0.5, 0.6, 0.7, 0.1, 0.2, 0.3, 0.1, 0.2, 0.3, 0.8, 0.9, 1.0, 1.1, 1.2, 1.3]);
    }
}

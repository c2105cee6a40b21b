use scanstitch_core::{Aabb, PointCloud};

/// Keep the points inside `bounds` (inclusive on every axis).
///
/// Points outside the box, and non-finite points, are dropped silently. An
/// empty or inverted box keeps nothing.
pub fn crop_box(cloud: &PointCloud, bounds: &Aabb) -> PointCloud {
    let keep: Vec<usize> = (0..cloud.len())
        .filter(|&i| bounds.contains(&cloud.point(i)))
        .collect();
    cloud.select(&keep)
}

/// Drop points with a NaN or infinite coordinate.
pub fn remove_non_finite(cloud: &PointCloud) -> PointCloud {
    let keep: Vec<usize> = (0..cloud.len()).filter(|&i| cloud.is_finite_at(i)).collect();
    if keep.len() == cloud.len() {
        return cloud.clone();
    }
    cloud.select(&keep)
}

#[cfg(test)]
mod tests {
    use super::{crop_box, remove_non_finite};
    use scanstitch_core::{Aabb, PointCloud};
    use proptest::prelude::*;

    fn sample_cloud() -> PointCloud {
        PointCloud::from_xyz(
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![10.0, 20.0, 30.0, 40.0, 50.0],
            vec![100.0, 200.0, 300.0, 400.0, 500.0],
        )
    }

    #[test]
    fn crop_box_keeps_inclusive_range() {
        let b = Aabb::new([2.0, 0.0, 0.0], [4.0, 100.0, 1000.0]);
        let result = crop_box(&sample_cloud(), &b);
        assert_eq!(result.x, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn crop_box_combines_axes() {
        let b = Aabb::new([0.0, 15.0, 0.0], [10.0, 100.0, 350.0]);
        let result = crop_box(&sample_cloud(), &b);
        assert_eq!(result.y, vec![20.0, 30.0]);
    }

    #[test]
    fn crop_box_empty_box_keeps_nothing() {
        assert!(crop_box(&sample_cloud(), &Aabb::empty()).is_empty());
    }

    #[test]
    fn crop_box_drops_nan() {
        let cloud = PointCloud::from_xyz(vec![0.0, f32::NAN], vec![0.0, 0.0], vec![0.0, 0.0]);
        let b = Aabb::new([-1.0; 3], [1.0; 3]);
        assert_eq!(crop_box(&cloud, &b).len(), 1);
    }

    #[test]
    fn remove_non_finite_filters_nan_and_inf() {
        let cloud = PointCloud::from_xyz(
            vec![0.0, f32::NAN, 1.0],
            vec![0.0, 0.0, f32::INFINITY],
            vec![0.0, 0.0, 0.0],
        );
        let out = remove_non_finite(&cloud);
        assert_eq!(out.len(), 1);
        assert_eq!(out.point(0), [0.0, 0.0, 0.0]);
    }

    proptest! {
        #[test]
        fn crop_box_result_within_bounds(
            pts in prop::collection::vec(
                (-100.0f32..100.0f32, -100.0f32..100.0f32, -100.0f32..100.0f32),
                1..500
            ),
            lo in (-50.0f32..0.0f32, -50.0f32..0.0f32, -50.0f32..0.0f32),
            hi in (0.0f32..50.0f32, 0.0f32..50.0f32, 0.0f32..50.0f32),
        ) {
            let cloud = PointCloud::from_xyz(
                pts.iter().map(|p| p.0).collect(),
                pts.iter().map(|p| p.1).collect(),
                pts.iter().map(|p| p.2).collect(),
            );
            let b = Aabb::new([lo.0, lo.1, lo.2], [hi.0, hi.1, hi.2]);
            let result = crop_box(&cloud, &b);
            for p in result.iter_points() {
                prop_assert!(b.contains(&p), "{:?} escaped {:?}", p, b);
            }
        }
    }
}

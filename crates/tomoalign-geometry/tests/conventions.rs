//! The geometric relations the format adapters rely on.

use approx::assert_abs_diff_eq;
use tomoalign_geometry::{
    change_origin, similarity_decompose, Affine2, FrameOrigin, FrameSize,
};

/// An IMOD-style image transform: rotation, slight magnification and shift.
fn image_transform() -> Affine2 {
    Affine2::translation(22.751, -0.799)
        .compose(&Affine2::uniform_scale(1.02))
        .compose(&Affine2::rotation(-11.4))
}

#[test]
fn inverse_transform_decomposes_to_negated_angle() {
    let full = image_transform();
    let native = full.invert().unwrap();

    let (angle, scale) = similarity_decompose(&native.matrix).unwrap();
    assert_abs_diff_eq!(angle, 11.4, epsilon = 1e-9);
    assert_abs_diff_eq!(scale, 1.0 / 1.02, epsilon = 1e-12);

    let p = [317.0, -45.5];
    let back = native.apply(&full.apply(&p));
    assert_abs_diff_eq!(back[0], p[0], epsilon = 1e-9);
    assert_abs_diff_eq!(back[1], p[1], epsilon = 1e-9);
}

#[test]
fn centre_anchored_rotation_keeps_frame_centre_fixed() {
    let frame = FrameSize::new(4096.0, 4096.0);
    let rotation = Affine2::rotation(30.0);
    let corner = change_origin(&rotation, FrameOrigin::Center, FrameOrigin::Corner, frame, 1.0);

    let centre = corner.apply(&[2048.0, 2048.0]);
    assert_abs_diff_eq!(centre[0], 2048.0, epsilon = 1e-9);
    assert_abs_diff_eq!(centre[1], 2048.0, epsilon = 1e-9);

    // The same map seen from the centre is the original rotation.
    let again = change_origin(&corner, FrameOrigin::Corner, FrameOrigin::Center, frame, 1.0);
    assert!(again.max_abs_diff(&rotation) < 1e-9);
}

#[test]
fn origin_change_commutes_with_inversion() {
    let frame = FrameSize::new(1024.0, 768.0);
    let full = image_transform();
    let a = change_origin(&full, FrameOrigin::Center, FrameOrigin::Corner, frame, 1.0)
        .invert()
        .unwrap();
    let b = change_origin(
        &full.invert().unwrap(),
        FrameOrigin::Center,
        FrameOrigin::Corner,
        frame,
        1.0,
    );
    assert!(a.max_abs_diff(&b) < 1e-9);
}

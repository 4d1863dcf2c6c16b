use a3d_core::{Buffer3dParams, ReflectionParams, Vector3};

/// Map an azimuth/elevation pair (radians) onto the backend's head-relative
/// coordinate system: +Z ahead, +Y up, azimuth turning towards -X.
pub fn project_direction(azimuth: f32, elevation: f32) -> Vector3 {
    Vector3::new(-azimuth.sin(), elevation.sin(), azimuth.cos())
}

/// 3-D parameter block for a reflection, placed at its averaged direction.
pub fn reflection_params(params: &ReflectionParams) -> Buffer3dParams {
    let (azimuth, elevation) = params.average_direction();
    Buffer3dParams::head_relative(project_direction(azimuth, elevation))
}

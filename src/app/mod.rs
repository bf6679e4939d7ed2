pub mod live_view;
pub mod views;

pub use live_view::LiveView;
pub use views::frame_view::FrameView;

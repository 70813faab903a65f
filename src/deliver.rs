pub mod dispatcher;
pub mod render_message;

pub use dispatcher::{DeliveryError, Dispatcher, RetryPolicy};
pub use render_message::{MessageRenderer, RenderError, Rendered};

use std::sync::Arc;
use segd_core::MaskPredictor;

pub struct AppState {
    pub segmentor: Arc<dyn MaskPredictor>,
}

pub mod contacts;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod profile;

use std::sync::Arc;

use courier_db::Database;
use courier_gateway::ChatService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub chat: ChatService,
    pub jwt_secret: String,
}

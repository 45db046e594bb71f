pub mod reset_admin;
pub mod server;

#[derive(Debug)]
pub enum Action {
    Server { port: u16, dsn: String },
    ResetAdmin { dsn: String },
}

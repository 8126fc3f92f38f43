mod handlers;
mod page;
mod routes;

pub use routes::create_router;

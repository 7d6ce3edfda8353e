use crate::{
    db::{DbPool, OrmConn},
    storefront::pricing::ShippingTable,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub shipping: ShippingTable,
}

use std::future::Future;

use futures_util::FutureExt;
use tokio::sync::mpsc;

#[inline]
pub fn send<T: Send>(tx: &mpsc::Sender<T>, val: T) -> impl Future<Output = Result<(), T>> + Send + '_ {
    tx.reserve().map(move |result| match result {
        Ok(permit) => {
            permit.send(val);
            Ok(())
        }
        Err(_) => Err(val),
    })
}

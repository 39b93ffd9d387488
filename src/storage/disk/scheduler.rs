use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    thread::JoinHandle,
};

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace, warn};

use super::manager::DiskManager;
use crate::storage::page::{PageId, PAGE_SIZE};

/// Completion handle for a scheduled disk request.
///
/// Either `.await` it from async code or call [`IoFuture::wait`] from a
/// plain thread. A request the worker never answered resolves to an error.
pub struct IoFuture<T> {
    page_id: PageId,
    done: oneshot::Receiver<Result<T>>,
}

impl<T> IoFuture<T> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Blocks the current thread until the worker finishes the request.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<T> {
        let page_id = self.page_id;
        self.done
            .blocking_recv()
            .unwrap_or_else(|_| Err(dropped(page_id)))
    }
}

impl<T> Future for IoFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let page_id = self.page_id;
        Pin::new(&mut self.done)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Err(dropped(page_id))))
    }
}

fn dropped(page_id: PageId) -> anyhow::Error {
    anyhow!("disk request for page {} was dropped before completing", page_id)
}

pub enum DiskRequest {
    Read {
        page_id: PageId,
        done: oneshot::Sender<Result<Box<[u8]>>>,
    },
    Write {
        page_id: PageId,
        data: Box<[u8]>,
        done: oneshot::Sender<Result<()>>,
    },
    Deallocate {
        page_id: PageId,
        done: oneshot::Sender<Result<()>>,
    },
}

/// Runs disk requests on a dedicated worker thread.
///
/// There is exactly one worker and it drains the queue in order, so requests
/// complete in the order they were scheduled. The buffer pool relies on this
/// to order a write-back before any later read of the same page.
pub struct DiskScheduler {
    sender: Option<mpsc::UnboundedSender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new<M: DiskManager>(manager: M) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = std::thread::spawn(move || run_worker(manager, rx));

        DiskScheduler {
            sender: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn schedule(&self, request: DiskRequest) {
        let Some(sender) = &self.sender else {
            return;
        };
        // A send error drops the request, and with it the completion
        // sender, so the matching IoFuture resolves to an error.
        if sender.send(request).is_err() {
            warn!("disk scheduler worker has stopped, request dropped");
        }
    }

    pub fn schedule_read(&self, page_id: PageId) -> IoFuture<Box<[u8]>> {
        let (done, rx) = oneshot::channel();
        self.schedule(DiskRequest::Read { page_id, done });
        IoFuture { page_id, done: rx }
    }

    pub fn schedule_write(&self, page_id: PageId, data: Box<[u8]>) -> IoFuture<()> {
        let (done, rx) = oneshot::channel();
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            done,
        });
        IoFuture { page_id, done: rx }
    }

    pub fn schedule_deallocate(&self, page_id: PageId) -> IoFuture<()> {
        let (done, rx) = oneshot::channel();
        self.schedule(DiskRequest::Deallocate { page_id, done });
        IoFuture { page_id, done: rx }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("disk scheduler worker panicked");
            }
        }
    }
}

fn run_worker<M: DiskManager>(mut manager: M, mut requests: mpsc::UnboundedReceiver<DiskRequest>) {
    while let Some(request) = requests.blocking_recv() {
        match request {
            DiskRequest::Read { page_id, done } => {
                let mut buffer = vec![0u8; PAGE_SIZE].into_boxed_slice();
                let result = manager.read_page(page_id, &mut buffer).map(|_| buffer);
                if let Err(err) = &result {
                    warn!(page_id, ?err, "disk read failed");
                }
                trace!(page_id, "read request done");
                let _ = done.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                done,
            } => {
                let result = manager.write_page(page_id, &data);
                if let Err(err) = &result {
                    warn!(page_id, ?err, "disk write failed");
                }
                trace!(page_id, "write request done");
                let _ = done.send(result);
            }
            DiskRequest::Deallocate { page_id, done } => {
                let result = manager.deallocate_page(page_id);
                if let Err(err) = &result {
                    warn!(page_id, ?err, "disk deallocation failed");
                }
                let _ = done.send(result);
            }
        }
    }
    trace!("disk scheduler worker exiting");
}

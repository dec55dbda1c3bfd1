use crossbeam::channel::{self, Receiver, Sender};

use crate::error::BackendError;

use super::{ChatBackend, Completion, CompletionRequest};

type Reply = Result<Completion, BackendError>;

struct Job {
    request: CompletionRequest,
    started: Sender<()>,
    reply: Sender<Reply>,
}

/// Owns a backend on its own thread and answers jobs one at a time.
pub struct ModelWorker<B> {
    backend: B,
    rx: Receiver<Job>,
}

impl<B: ChatBackend + Send + 'static> ModelWorker<B> {
    /// Starts the worker thread. It exits once every [`ModelHandle`] is dropped.
    pub fn spawn(backend: B) -> (ModelHandle, std::thread::JoinHandle<()>) {
        let (tx, rx) = channel::unbounded();
        let handle = ModelHandle {
            name: backend.name().to_string(),
            tx,
        };
        let mut worker = ModelWorker { backend, rx };
        let join = std::thread::spawn(move || worker.run_loop());
        (handle, join)
    }

    fn run_loop(&mut self) {
        while let Ok(job) = self.rx.recv() {
            // the caller gave up while the job was queued
            if job.started.send(()).is_err() {
                log::debug!("{} skipping abandoned job", self.backend.name());
                continue;
            }
            log::debug!(
                "{} <- {} messages, max_tokens {}",
                self.backend.name(),
                job.request.messages.len(),
                job.request.max_tokens
            );
            let reply = self.backend.complete(&job.request);
            if let Err(e) = &reply {
                log::error!("{} failed: {e}", self.backend.name());
            }
            // the caller may have timed out or cancelled
            if job.reply.send(reply).is_err() {
                log::debug!("{} reply dropped, nobody waiting", self.backend.name());
            }
        }
        log::debug!("{} worker stopped", self.backend.name());
    }
}

/// Cheap, cloneable reference to a running [`ModelWorker`].
#[derive(Debug, Clone)]
pub struct ModelHandle {
    name: String,
    tx: Sender<Job>,
}

impl ModelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn submit(&self, request: CompletionRequest) -> Result<PendingCompletion, BackendError> {
        let (started, started_rx) = channel::bounded(1);
        let (reply, rx) = channel::bounded(1);
        self.tx
            .send(Job {
                request,
                started,
                reply,
            })
            .map_err(|_| BackendError::Unavailable(format!("{} worker is not running", self.name)))?;
        Ok(PendingCompletion {
            name: self.name.clone(),
            started: started_rx,
            rx,
        })
    }
}

/// A completion queued on, or running on, the worker thread.
///
/// Dropping it before the worker gets to the job means the job is never run.
#[derive(Debug)]
pub struct PendingCompletion {
    name: String,
    started: Receiver<()>,
    rx: Receiver<Reply>,
}

impl PendingCompletion {
    /// Fires once the backend starts on this job. Disconnects if it never will.
    pub fn started(&self) -> &Receiver<()> {
        &self.started
    }

    pub fn receiver(&self) -> &Receiver<Reply> {
        &self.rx
    }

    /// Maps a received value; a closed channel means the worker died mid-job.
    pub fn resolve(&self, received: Result<Reply, channel::RecvError>) -> Reply {
        received.unwrap_or_else(|_| {
            Err(BackendError::Unavailable(format!(
                "{} worker stopped before answering",
                self.name
            )))
        })
    }

    pub fn wait(self) -> Reply {
        let received = self.rx.recv();
        self.resolve(received)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;
    use crate::sys::llm::{Content, Role};

    struct Upper;

    impl ChatBackend for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
            let last = request
                .messages
                .last()
                .ok_or_else(|| BackendError::Malformed("empty request".into()))?;
            Ok(Completion::assistant(last.content.to_uppercase()))
        }
    }

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Content {
                role: Role::User,
                content: text.into(),
            }],
            max_tokens: 8,
        }
    }

    #[test]
    fn worker_answers_jobs_in_order() {
        let (handle, join) = ModelWorker::spawn(Upper);
        assert_eq!(handle.name(), "upper");

        let first = handle.submit(request("one")).unwrap();
        let second = handle.submit(request("two")).unwrap();
        assert_eq!(first.wait().unwrap().content, "ONE");
        assert_eq!(second.wait().unwrap().content, "TWO");

        let empty = CompletionRequest {
            messages: vec![],
            max_tokens: 8,
        };
        assert!(matches!(
            handle.submit(empty).unwrap().wait(),
            Err(BackendError::Malformed(_))
        ));

        drop(handle);
        join.join().unwrap();
    }

    #[test]
    fn abandoned_reply_does_not_stop_the_worker() {
        let (handle, _join) = ModelWorker::spawn(Upper);
        drop(handle.submit(request("ignored")).unwrap());
        assert_eq!(
            handle.submit(request("still here")).unwrap().wait().unwrap().content,
            "STILL HERE"
        );
    }

    struct Gated {
        calls: Arc<AtomicUsize>,
        gate: Receiver<()>,
    }

    impl ChatBackend for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.recv();
            Upper.complete(request)
        }
    }

    #[test]
    fn queued_job_dropped_by_its_caller_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = channel::unbounded();
        let (handle, _join) = ModelWorker::spawn(Gated {
            calls: calls.clone(),
            gate,
        });

        let first = handle.submit(request("one")).unwrap();
        let abandoned = handle.submit(request("two")).unwrap();
        drop(abandoned);
        let third = handle.submit(request("three")).unwrap();

        release.send(()).unwrap();
        release.send(()).unwrap();
        assert_eq!(first.wait().unwrap().content, "ONE");
        assert_eq!(third.wait().unwrap().content, "THREE");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn started_fires_when_the_backend_picks_the_job_up() {
        let (release, gate) = channel::unbounded();
        let (handle, _join) = ModelWorker::spawn(Gated {
            calls: Arc::default(),
            gate,
        });

        let first = handle.submit(request("one")).unwrap();
        let second = handle.submit(request("two")).unwrap();
        first.started().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(second.started().try_recv().is_err());

        release.send(()).unwrap();
        second.started().recv_timeout(Duration::from_secs(5)).unwrap();
        release.send(()).unwrap();
        assert_eq!(second.wait().unwrap().content, "TWO");
        assert_eq!(first.wait().unwrap().content, "ONE");
    }

    #[test]
    fn stopped_worker_is_unavailable() {
        let (tx, rx) = channel::unbounded();
        drop(rx);
        let handle = ModelHandle {
            name: "gone".into(),
            tx,
        };
        assert!(matches!(
            handle.submit(request("x")),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn worker_lives_while_any_handle_does() {
        let (handle, join) = ModelWorker::spawn(Upper);
        let clone = handle.clone();
        drop(handle);
        assert_eq!(clone.submit(request("x")).unwrap().wait().unwrap().content, "X");
        drop(clone);
        join.join().unwrap();
    }
}

/*!
 * Credit Accounting Properties
 *
 * Credits are conserved across the domain budget, the pools and the port
 * caches; consumer tokens and releases track exactly what was received.
 */

mod common;

use common::{domain, domain_args, open, port_args};
use hqm_datapath::{DatapathConfig, DequeueQe, EnqueueQe, PortType, SchedType};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_pool_budget_is_conserved(
        budget in 0u32..512,
        requests in prop::collection::vec(0u32..200, 1..16),
    ) {
        let (_dev, dp) = open(DatapathConfig::default());
        let id = dp.create_sched_domain(&domain_args(budget, 64)).unwrap();
        let handle = dp.attach_sched_domain(id).unwrap();

        let mut remaining = budget;
        for n in requests {
            let created = handle.create_ldb_credit_pool(n);
            prop_assert_eq!(created.is_ok(), n <= remaining);
            if created.is_ok() {
                remaining -= n;
            }

            let (left, total) = handle.domain().credit_budget(PortType::Ldb);
            prop_assert_eq!(left, remaining);
            prop_assert_eq!(total, budget);
            prop_assert_eq!(handle.domain().pool_credits(PortType::Ldb) + left, budget);
        }
    }

    #[test]
    fn prop_send_draws_only_available_credits(pool in 0u32..300, n in 0usize..300) {
        let (dev, dp) = open(DatapathConfig::default());
        let s = domain(&dp, pool, 64, true);
        let port_id = s
            .domain
            .create_ldb_port(&port_args(s.ldb_pool, s.dir_pool, 16))
            .unwrap();
        let mut producer = s.domain.attach_ldb_port(port_id).unwrap();

        let events: Vec<EnqueueQe> = (0..n as u64)
            .map(|i| EnqueueQe::new(s.ldb_queue, SchedType::Atomic, i))
            .collect();
        let accepted = producer.send(&events).unwrap();

        prop_assert_eq!(accepted, n.min(pool as usize));
        let in_pool = s.domain.credit_pool_available(PortType::Ldb, s.ldb_pool).unwrap();
        let cached = producer.credits(PortType::Ldb);
        prop_assert_eq!(in_pool + cached, pool - accepted as u32);
        prop_assert!(cached < 2 * dp.config().credit_batch_size);
        prop_assert_eq!(dev.queue_backlog(PortType::Ldb, s.ldb_queue), Some(accepted));
    }

    #[test]
    fn prop_owed_counters_track_receives(k in 1usize..=32, pop in 0usize..64) {
        let (_dev, dp) = open(DatapathConfig::default());
        let s = domain(&dp, 256, 64, true);
        let args = port_args(s.ldb_pool, s.dir_pool, 32);
        let producer_id = s.domain.create_ldb_port(&args).unwrap();
        let consumer_id = s.domain.create_ldb_port(&args).unwrap();
        let mut producer = s.domain.attach_ldb_port(producer_id).unwrap();
        let mut consumer = s.domain.attach_ldb_port(consumer_id).unwrap();
        consumer.link_queue(s.ldb_queue, 0).unwrap();

        let events: Vec<EnqueueQe> = (0..k as u64)
            .map(|i| EnqueueQe::new(s.ldb_queue, SchedType::Atomic, i))
            .collect();
        prop_assert_eq!(producer.send(&events).unwrap(), k);

        let mut out = [DequeueQe::default(); 32];
        prop_assert_eq!(consumer.recv_no_pop(&mut out, false).unwrap(), k);
        prop_assert_eq!(consumer.owed_tokens() as usize, k);
        prop_assert_eq!(consumer.owed_releases() as usize, k);

        let popped = consumer.pop_cq(pop).unwrap();
        prop_assert_eq!(popped, pop.min(k));
        prop_assert_eq!(consumer.owed_tokens() as usize, k - popped);

        let released = consumer.release(k + 1).unwrap();
        prop_assert_eq!(released, k);
        prop_assert_eq!(consumer.owed_releases(), 0);
    }
}

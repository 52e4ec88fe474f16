//! end-to-end market flow against the in-process network
//!
//! bettor encrypts -> ledger queues -> network executes -> bettor opens the
//! receipt -> creator resolves -> winners claim.

use std::sync::Arc;

use dark_market::bet::BetSecrets;
use dark_market::ledger::ComputationOutput;
use dark_market::{
    decode_receipt, encode_bet, AccountId, BetInput, ComputationNetwork, Error, Ledger,
    LocalCluster, MarketRequest, MarketStatus, NetworkConfig, ResolveRequest, Side,
    ZeroWinnerPolicy,
};

const T0: u64 = 1_700_000_000;
const END: u64 = T0 + 86_400;
const CREATOR: AccountId = [0xc0; 32];

fn account(n: u8) -> AccountId {
    let mut id = [0u8; 32];
    id[0] = n;
    id
}

fn setup(policy: ZeroWinnerPolicy) -> (Ledger, LocalCluster) {
    let cluster = LocalCluster::generate();
    let config = NetworkConfig::new(cluster.public_key()).with_zero_winner_policy(policy);
    let ledger = Ledger::new(Arc::new(config));
    ledger
        .create_market(
            CREATOR,
            MarketRequest {
                market_id: 7,
                question: "will the proposal pass?".into(),
                end_time_unix: END,
            },
            T0,
        )
        .unwrap();
    (ledger, cluster)
}

fn place(
    ledger: &Ledger,
    cluster: &LocalCluster,
    who: AccountId,
    amount: u64,
    side: u8,
) -> (u64, BetSecrets) {
    let input = BetInput::new(7, amount, side, amount).unwrap();
    let (data, secrets) = encode_bet(&input, &cluster.public_key()).unwrap();
    let offset = ledger
        .place_bet(7, who, data.to_submission(ledger.generate_offset()), T0 + 60)
        .unwrap();
    let receipt = ledger.complete_place_bet(offset, cluster).unwrap();

    // bytes-level decode, as a wallet would do it
    let opened = decode_receipt(
        &receipt.ciphertext,
        secrets.private_key.to_bytes().as_slice(),
        receipt.nonce.as_bytes(),
        &cluster.public_key(),
    )
    .unwrap();
    assert_eq!(opened.amount, amount);
    assert_eq!(opened.prediction, Side::try_from(side).unwrap());
    (opened.bet_id, secrets)
}

fn resolve(ledger: &Ledger, cluster: &LocalCluster, side: u8) -> dark_market::Result<u64> {
    let offset = ledger.resolve_market(
        7,
        CREATOR,
        ResolveRequest {
            computation_offset: ledger.generate_offset(),
            winning_side: side,
        },
        END,
    )?;
    Ok(ledger.complete_resolution(offset, cluster, END + 5)?.payout_ratio)
}

#[test]
fn test_reference_market() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Fail);

    let (a, _) = place(&ledger, &cluster, account(1), 10_000_000_000, 1);
    let (b, _) = place(&ledger, &cluster, account(2), 2_200_000_000, 1);
    let (c, _) = place(&ledger, &cluster, account(3), 5_300_000_000, 0);

    assert_eq!(resolve(&ledger, &cluster, 1).unwrap(), 1_434_426);

    let record = ledger.resolution(7).unwrap();
    assert_eq!(record.total_pool, 17_500_000_000);
    assert_eq!(record.winning_pool, 12_200_000_000);

    let paid_a = ledger.claim(7, a, account(1), &cluster).unwrap();
    let paid_b = ledger.claim(7, b, account(2), &cluster).unwrap();
    let paid_c = ledger.claim(7, c, account(3), &cluster).unwrap();
    assert_eq!(paid_a, 14_344_260_000);
    assert_eq!(paid_b, 3_155_737_200);
    assert_eq!(paid_c, 0);
    assert!(paid_a + paid_b + paid_c <= record.total_pool);
}

#[test]
fn test_concurrent_bettors() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Fail);

    let ids: Vec<u64> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let (ledger, cluster) = (&ledger, &cluster);
                s.spawn(move || {
                    place(ledger, cluster, account(i), 1_000 * (i as u64 + 1), i % 2).0
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..8).collect::<Vec<_>>());
    assert_eq!(ledger.market(7).unwrap().total_bets, 8);
    assert_eq!(ledger.in_flight(), 0);

    // yes side: i = 1, 3, 5, 7 -> 2k + 4k + 6k + 8k
    resolve(&ledger, &cluster, 1).unwrap();
    let record = ledger.resolution(7).unwrap();
    assert_eq!(record.total_pool, 36_000);
    assert_eq!(record.winning_pool, 20_000);
    assert_eq!(record.payout_ratio, 1_800_000);
}

#[test]
fn test_bettor_reopens_submission() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Fail);
    let (bet_id, secrets) = place(&ledger, &cluster, account(1), 4_242, 0);

    let stored = ledger.bet(7, bet_id).unwrap();
    let (amount, side) =
        dark_market::decode_bet(&stored.data, &secrets, &cluster.public_key()).unwrap();
    assert_eq!((amount, side), (4_242, Side::No));
    assert_eq!(secrets.user_nonce, 4_242);
}

#[test]
fn test_ciphertexts_hide_equal_bets() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Fail);
    let (x, _) = place(&ledger, &cluster, account(1), 500, 1);
    let (y, _) = place(&ledger, &cluster, account(2), 500, 1);

    let bx = ledger.bet(7, x).unwrap();
    let by = ledger.bet(7, y).unwrap();
    assert_ne!(bx.data.ciphertext_amount, by.data.ciphertext_amount);
    assert_ne!(bx.data.ciphertext_prediction, by.data.ciphertext_prediction);
    assert_ne!(bx.data.nonce, by.data.nonce);
}

#[test]
fn test_no_winners_then_refund() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Refund);
    let (a, _) = place(&ledger, &cluster, account(1), 300, 0);
    let (b, _) = place(&ledger, &cluster, account(2), 700, 0);

    assert_eq!(resolve(&ledger, &cluster, 1).unwrap_err(), Error::NoWinningBets);
    assert_eq!(ledger.market(7).unwrap().status, MarketStatus::Voided);
    assert!(ledger.resolution(7).is_none());

    assert_eq!(ledger.refund(7, a, account(1), &cluster).unwrap(), 300);
    assert_eq!(ledger.refund(7, b, account(2), &cluster).unwrap(), 700);
    assert_eq!(
        ledger.refund(7, b, account(2), &cluster).unwrap_err(),
        Error::BetAlreadyClaimed
    );
}

#[test]
fn test_failed_market_voided_by_creator() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Fail);
    let (a, _) = place(&ledger, &cluster, account(1), 300, 0);

    assert_eq!(resolve(&ledger, &cluster, 1).unwrap_err(), Error::NoWinningBets);
    assert_eq!(
        ledger.market(7).unwrap().status,
        MarketStatus::Failed { winning_side: Side::Yes }
    );
    assert!(matches!(
        resolve(&ledger, &cluster, 0),
        Err(Error::OutcomeMismatch { .. })
    ));

    ledger.void_market(7, CREATOR).unwrap();
    assert_eq!(ledger.refund(7, a, account(1), &cluster).unwrap(), 300);
}

#[test]
fn test_second_resolution_rejected() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Fail);
    place(&ledger, &cluster, account(1), 100, 1);

    resolve(&ledger, &cluster, 1).unwrap();
    let first = ledger.resolution(7).unwrap();

    assert_eq!(
        resolve(&ledger, &cluster, 0).unwrap_err(),
        Error::MarketAlreadyResolved
    );
    assert_eq!(ledger.resolution(7).unwrap(), first);
}

#[test]
fn test_resolution_output_polled() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Fail);
    place(&ledger, &cluster, account(1), 100, 1);

    let offset = ledger
        .resolve_market(
            7,
            CREATOR,
            ResolveRequest {
                computation_offset: ledger.generate_offset(),
                winning_side: 1,
            },
            END,
        )
        .unwrap();
    assert_eq!(ledger.poll(offset).unwrap(), None);

    let record = ledger.complete_resolution(offset, &cluster, END).unwrap();
    assert_eq!(
        ledger.poll(offset).unwrap(),
        Some(ComputationOutput::Resolved(record))
    );
}

#[test]
fn test_foreign_network_bet_aborts() {
    let (ledger, cluster) = setup(ZeroWinnerPolicy::Fail);
    let stranger = LocalCluster::generate();

    let input = BetInput::new(7, 100, 1, 0).unwrap();
    let (data, _) = encode_bet(&input, &stranger.public_key()).unwrap();
    let offset = ledger
        .place_bet(7, account(1), data.to_submission(ledger.generate_offset()), T0)
        .unwrap();

    assert!(ledger.complete_place_bet(offset, &cluster).is_err());
    assert!(matches!(ledger.poll(offset), Err(Error::ComputationAborted(..))));
    let market = ledger.market(7).unwrap();
    assert_eq!((market.total_bets, market.pending_bets), (0, 0));
}

//! Server-side Lua scripts for multi-key state transitions.
//!
//! Every transition that touches more than one key and cannot be expressed
//! as a plain MULTI/EXEC pipeline runs as one of these scripts, so no other
//! client ever observes an intermediate state. [`redis::Script`] submits by
//! SHA1 (`EVALSHA`) and transparently falls back to a full `EVAL` when the
//! server has not cached the source yet, so repeated invocations are cheap.

use std::sync::LazyLock;

use redis::Script;

/// Confirms a claim after the rotate-pop.
///
/// KEYS: pending list, working zset, payloads hash, task state prefix.
/// ARGV: task id, current time, working status value.
///
/// Removes the id from the pending list; zero removals mean another
/// consumer confirmed first, and the script returns nil without touching
/// anything else. Otherwise it moves the task into the working zset scored
/// by its stale deadline, stamps the state hash, and returns the id with
/// the raw payload.
pub(crate) static CLAIM: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local pending, working, payloads, state_prefix = unpack(KEYS)
        local task_id = ARGV[1]
        local now = tonumber(ARGV[2])
        local working_status = ARGV[3]

        local removed = redis.call('LREM', pending, 1, task_id)
        if removed == 0 then
            return false
        end

        local payload = redis.call('HGET', payloads, task_id)

        local state_key = state_prefix .. ':' .. task_id
        local task_timeout = tonumber(redis.call('HGET', state_key, 'timeout'))
        redis.call('ZADD', working, now + task_timeout, task_id)

        redis.call('HSET', state_key, 'last_dequeue_time', now)
        redis.call('HSET', state_key, 'status', working_status)
        redis.call('HINCRBY', state_key, 'dequeue_count', 1)

        return {task_id, payload}
        "#,
    )
});

/// Reclaims stale claims and promotes due delayed tasks, in one pass.
///
/// KEYS: pending list, working zset, delayed zset, task state prefix.
/// ARGV: current time, pending status value.
///
/// Members of either zset whose score is due are pushed onto the pending
/// list in one batch, their state hashes are stamped as requeued, and the
/// total number moved is returned.
pub(crate) static SWEEP: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local function reclaim(pending, source, state_prefix, now, pending_status)
            local task_ids = redis.call('ZRANGEBYSCORE', source, 0, now)
            if #task_ids == 0 then
                return 0
            end

            redis.call('LPUSH', pending, unpack(task_ids))
            redis.call('ZREM', source, unpack(task_ids))

            for _, task_id in ipairs(task_ids) do
                local state_key = state_prefix .. ':' .. task_id
                redis.call('HSET', state_key, 'last_requeue_time', now)
                redis.call('HSET', state_key, 'status', pending_status)
                redis.call('HINCRBY', state_key, 'requeue_count', 1)
            end

            return #task_ids
        end

        local pending, working, delayed, state_prefix = unpack(KEYS)
        local now = tonumber(ARGV[1])
        local pending_status = ARGV[2]

        return
            reclaim(pending, working, state_prefix, now, pending_status) +
            reclaim(pending, delayed, state_prefix, now, pending_status)
        "#,
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_have_distinct_hashes() {
        assert_ne!(CLAIM.get_hash(), SWEEP.get_hash());
    }

    #[test]
    fn test_script_hashes_are_sha1() {
        for script in [&*CLAIM, &*SWEEP] {
            let hash = script.get_hash();
            assert_eq!(hash.len(), 40);
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}

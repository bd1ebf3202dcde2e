/// Lua script for one atomic reclaim pass over a single queue.
///
/// KEYS\[1\] = claimed sorted set (score = claim timestamp)
/// KEYS\[2\] = attempts hash
/// KEYS\[3\] = unclaimed list
/// KEYS\[4\] = data hash
/// KEYS\[5\] = abandoned sorted set (score = claim timestamp at death)
/// KEYS\[6\] = delayed sorted set (score = ready-at timestamp)
/// KEYS\[7\] = cluster-wide queues-with-jobs set
/// ARGV\[1\] = claim cutoff timestamp (claims with score <= this expired)
/// ARGV\[2\] = prune cutoff timestamp
/// ARGV\[3\] = attempts limit
/// ARGV\[4\] = current unix timestamp
/// ARGV\[5\] = encoded queue name
/// ARGV\[6\] = per-pass item limit
///
/// Returns `{released, abandoned, pruned, undelayed, ready}`.
///
/// Expired claims are re-appended (RPUSH) to the unclaimed list while
/// promoted delayed jobs are prepended (LPUSH); workers observe both
/// orderings, so they are kept as-is.
pub const RECLAIM: &str = r"
if redis.call('EXISTS', KEYS[4]) == 0 then
    redis.call('SREM', KEYS[7], ARGV[5])
    return {0, 0, 0, 0, 0}
end

local limit = tonumber(ARGV[6])
local attemptsLimit = tonumber(ARGV[3])
local released, abandoned, pruned = 0, 0, 0

local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, limit)
for _, id in ipairs(expired) do
    local attempts = tonumber(redis.call('HGET', KEYS[2], id)) or 0
    if attempts < attemptsLimit then
        redis.call('RPUSH', KEYS[3], id)
        released = released + 1
    else
        local claimedAt = redis.call('ZSCORE', KEYS[1], id)
        redis.call('ZADD', KEYS[5], claimedAt, id)
        abandoned = abandoned + 1
    end
    redis.call('ZREM', KEYS[1], id)
end

local dead = redis.call('ZRANGEBYSCORE', KEYS[5], '-inf', ARGV[2], 'LIMIT', 0, limit)
for _, id in ipairs(dead) do
    redis.call('ZREM', KEYS[5], id)
    redis.call('HDEL', KEYS[2], id)
    redis.call('HDEL', KEYS[4], id)
    pruned = pruned + 1
end

local due = redis.call('ZRANGEBYSCORE', KEYS[6], '-inf', ARGV[4], 'LIMIT', 0, limit)
for _, id in ipairs(due) do
    redis.call('LPUSH', KEYS[3], id)
    redis.call('ZREM', KEYS[6], id)
end
local undelayed = #due

local ready = redis.call('LLEN', KEYS[3])
local live = ready + redis.call('ZCARD', KEYS[1]) + redis.call('ZCARD', KEYS[6])
if live > 0 then
    redis.call('SADD', KEYS[7], ARGV[5])
else
    redis.call('SREM', KEYS[7], ARGV[5])
end

return {released, abandoned, pruned, undelayed, ready}
";

/// Lua script publishing one cycle's ready map atomically: rebuild the
/// staging hash, then rename it over the live key.
///
/// KEYS\[1\] = staging hash key
/// KEYS\[2\] = live ready-map hash key
/// ARGV = alternating encoded queue name, last-ready timestamp
///
/// Returns the number of entries published. The caller must pass at
/// least one pair; renaming an empty staging key would fail.
pub const PUBLISH_READY: &str = r"
redis.call('DEL', KEYS[1])
for i = 1, #ARGV, 2 do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('RENAME', KEYS[1], KEYS[2])
return #ARGV / 2
";
